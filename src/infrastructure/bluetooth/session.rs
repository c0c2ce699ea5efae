//! Device Session
//!
//! Single owner of everything the components share: connection state,
//! the device snapshot and the resolved characteristic handles. Mutation
//! goes through the methods here rather than through field access.

use crate::domain::error::DeviceError;
use crate::domain::identity::DeviceIdentity;
use crate::domain::levels::LevelMap;
use crate::domain::models::{ConnectionState, DeviceSnapshot, DisconnectReason, SessionEvent};
use crate::infrastructure::bluetooth::transport::BleDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Resolved handles of a connected mat
#[derive(Clone)]
pub struct Link {
    pub device: Arc<dyn BleDevice>,
    pub temperature: Uuid,
    pub timer: Uuid,
    /// Vendor init/keep-alive characteristic, when the device exposes it
    pub set: Option<Uuid>,
}

pub struct Session {
    identity: DeviceIdentity,
    levels: LevelMap,
    state: watch::Sender<ConnectionState>,
    snapshot: Mutex<DeviceSnapshot>,
    link: Mutex<Option<Link>>,
    /// Peripheral the connection loop holds open, known before its handles
    connected: Mutex<Option<Arc<dyn BleDevice>>>,
    /// Serializes every attribute read and write on the link
    io_lock: tokio::sync::Mutex<()>,
    ever_connected: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    pub fn new(identity: DeviceIdentity, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let levels = identity.variant.level_map();
        let snapshot = DeviceSnapshot::new(levels.min_temperature());
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            identity,
            levels,
            state,
            snapshot: Mutex::new(snapshot),
            link: Mutex::new(None),
            connected: Mutex::new(None),
            io_lock: tokio::sync::Mutex::new(()),
            ever_connected: AtomicBool::new(false),
            events,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn levels(&self) -> &LevelMap {
        &self.levels
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move to `next` and announce it
    pub fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        info!("Connection state: {} -> {}", previous, next);
        if next.is_ready() {
            self.ever_connected.store(true, Ordering::SeqCst);
        }
        self.publish(SessionEvent::ConnectionChanged(next));
    }

    /// Leave `Ready` because the link is unusable.
    ///
    /// Returns false when the session was not ready, in which case some other
    /// path already started the teardown.
    pub fn force_disconnect(&self, reason: DisconnectReason) -> bool {
        let next = ConnectionState::Disconnected(reason);
        let changed = self.state.send_if_modified(|state| {
            if state.is_ready() {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Forcing disconnect: {}", reason);
            self.publish(SessionEvent::ConnectionChanged(next));
        }
        changed
    }

    /// Whether the mat has ever reached `Ready` in this process
    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Apply `update` to the snapshot and publish it if anything changed
    pub fn update_snapshot<F>(&self, update: F) -> Option<DeviceSnapshot>
    where
        F: FnOnce(&mut DeviceSnapshot),
    {
        let changed = {
            let mut snapshot = lock(&self.snapshot);
            let before = snapshot.clone();
            update(&mut snapshot);
            (*snapshot != before).then(|| snapshot.clone())
        };
        if let Some(snapshot) = &changed {
            self.publish(SessionEvent::SnapshotChanged(snapshot.clone()));
        }
        changed
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn link(&self) -> Option<Link> {
        lock(&self.link).clone()
    }

    pub fn set_link(&self, link: Option<Link>) {
        *lock(&self.link) = link;
    }

    pub fn set_connected(&self, device: Option<Arc<dyn BleDevice>>) {
        *lock(&self.connected) = device;
    }

    /// Take the open peripheral so that exactly one caller disconnects it
    pub fn take_connected(&self) -> Option<Arc<dyn BleDevice>> {
        lock(&self.connected).take()
    }

    /// Current link, or `NotReady` when the session cannot take commands
    pub fn ready_link(&self) -> Result<Link, DeviceError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(DeviceError::NotReady(state));
        }
        self.link().ok_or(DeviceError::NotReady(state))
    }

    pub fn io_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.io_lock
    }
}

/// Resolves once the watched state is anything but `Ready`
pub async fn left_ready(state: &mut watch::Receiver<ConnectionState>) {
    loop {
        let ready = state.borrow_and_update().is_ready();
        if !ready || state.changed().await.is_err() {
            return;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::test_identity;

    #[test]
    fn test_transition_publishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(test_identity(), tx);
        assert!(!session.ever_connected());

        session.transition(ConnectionState::Scanning);
        session.transition(ConnectionState::Ready);

        assert!(session.ever_connected());
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ConnectionChanged(ConnectionState::Scanning)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ConnectionChanged(ConnectionState::Ready)
        );
    }

    #[test]
    fn test_force_disconnect_only_from_ready() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(test_identity(), tx);

        session.transition(ConnectionState::Scanning);
        assert!(!session.force_disconnect(DisconnectReason::WriteFatal));
        assert_eq!(session.state(), ConnectionState::Scanning);

        session.transition(ConnectionState::Ready);
        assert!(session.force_disconnect(DisconnectReason::WriteFatal));
        assert!(!session.force_disconnect(DisconnectReason::PeerDropped));
        assert_eq!(
            session.state(),
            ConnectionState::Disconnected(DisconnectReason::WriteFatal)
        );
    }

    #[test]
    fn test_update_snapshot_skips_unchanged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(test_identity(), tx);

        assert!(session.update_snapshot(|s| s.apply_timer(2)).is_some());
        assert!(session.update_snapshot(|s| s.apply_timer(2)).is_none());
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::SnapshotChanged(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ready_link_requires_ready() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(test_identity(), tx);
        assert!(matches!(
            session.ready_link(),
            Err(DeviceError::NotReady(ConnectionState::Idle))
        ));
    }
}
