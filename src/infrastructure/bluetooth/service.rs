//! Bluetooth Service Module
//!
//! `MatService` is the public facade. It owns the session and runs the
//! scan/connect loop as its own task, so consumer calls never wait on the
//! radio.

use crate::domain::error::{DeviceError, TransportError};
use crate::domain::identity::DeviceIdentity;
use crate::domain::models::{
    CharacteristicRole, ConnectionState, DeviceSnapshot, DisconnectReason, SessionEvent,
};
use crate::domain::settings::SessionSettings;
use crate::infrastructure::bluetooth::connection::{CharacteristicSession, Established};
use crate::infrastructure::bluetooth::dispatcher::{NotificationDispatcher, INBOUND_CAPACITY};
use crate::infrastructure::bluetooth::keepalive::KeepAlive;
use crate::infrastructure::bluetooth::reader::ReadQueue;
use crate::infrastructure::bluetooth::scanner::Scanner;
use crate::infrastructure::bluetooth::scheduler::CommandScheduler;
use crate::infrastructure::bluetooth::session::{left_ready, Session};
use crate::infrastructure::bluetooth::task::ScheduledTask;
use crate::infrastructure::bluetooth::transport::{BleAdapter, BleDevice, EventStream};
use crate::infrastructure::bluetooth::writer::CharacteristicWriter;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

type SharedReads = Arc<Mutex<Option<ReadQueue>>>;

/// Main service coordinating all BLE operations for one mat
pub struct MatService {
    session: Arc<Session>,
    scheduler: CommandScheduler,
    reads: SharedReads,
    dispatcher: ScheduledTask,
    control: Mutex<Option<ScheduledTask>>,
}

impl MatService {
    /// Start managing the mat described by `identity`.
    ///
    /// Must be called from within a tokio runtime. Returns immediately; the
    /// connection is brought up in the background and every change is
    /// reported on `events`.
    pub fn start(
        identity: DeviceIdentity,
        timing: SessionSettings,
        adapter: Arc<dyn BleAdapter>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let session = Arc::new(Session::new(identity, events));
        let writer = Arc::new(CharacteristicWriter::new(session.clone(), &timing));
        let scheduler = CommandScheduler::new(session.clone(), writer.clone(), timing.debounce());
        let reads: SharedReads = Arc::new(Mutex::new(None));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let dispatcher = NotificationDispatcher::new(session.clone()).spawn(inbound_rx);

        let control = ConnectionLoop {
            session: session.clone(),
            writer: writer.clone(),
            scanner: Scanner::new(adapter, timing.scan_window()),
            setup: CharacteristicSession::new(session.clone(), writer, inbound_tx, &timing),
            reads: reads.clone(),
            timing,
        };

        Self {
            session,
            scheduler,
            reads,
            dispatcher: ScheduledTask::from(dispatcher),
            control: Mutex::new(Some(ScheduledTask::spawn(control.run()))),
        }
    }

    /// Debounced temperature request, see [`CommandScheduler::request_temperature`]
    pub fn request_temperature(&self, celsius: f32) -> Result<(), DeviceError> {
        self.scheduler.request_temperature(celsius)
    }

    pub fn request_power(&self, on: bool) -> Result<(), DeviceError> {
        self.scheduler.request_power(on)
    }

    pub async fn request_timer_hours(&self, hours: i32) -> Result<(), DeviceError> {
        self.scheduler.request_timer_hours(hours).await
    }

    pub async fn request_timer_on(&self, on: bool) -> Result<(), DeviceError> {
        self.scheduler.request_timer_on(on).await
    }

    /// Queue a read of both characteristics. Results arrive as snapshot events.
    pub fn request_refresh(&self) -> Result<(), DeviceError> {
        let link = self.session.ready_link()?;
        let reads = self.reads.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(reads) = reads else {
            return Err(DeviceError::NotReady(self.session.state()));
        };
        reads.enqueue(link.temperature, CharacteristicRole::Temperature)?;
        reads.enqueue(link.timer, CharacteristicRole::Timer)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.session.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe_state()
    }

    /// Stop the connection loop and release the link
    pub async fn shutdown(&self) {
        self.scheduler.cancel_pending();
        let control = self
            .control
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(control) = control else {
            return;
        };
        control.cancel();
        drop(control);

        *self.reads.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.session.set_link(None);
        if let Some(device) = self.session.take_connected() {
            if let Err(err) = device.disconnect().await {
                warn!("Disconnect during shutdown failed: {}", err);
            }
        }
        self.session
            .transition(ConnectionState::Disconnected(DisconnectReason::Shutdown));
        self.dispatcher.cancel();
        info!("Mat service stopped");
    }
}

/// Per-connection resources held while `Ready`
struct Active {
    device: Arc<dyn BleDevice>,
    established: Established,
    drops: EventStream<()>,
    keepalive: Option<ScheduledTask>,
}

struct ConnectionLoop {
    session: Arc<Session>,
    writer: Arc<CharacteristicWriter>,
    scanner: Scanner,
    setup: CharacteristicSession,
    reads: SharedReads,
    timing: SessionSettings,
}

impl ConnectionLoop {
    async fn run(self) {
        let mut device: Option<Arc<dyn BleDevice>> = None;
        let mut active: Option<Active> = None;

        loop {
            match self.session.state() {
                ConnectionState::Idle => {
                    device = self.scanner.cached(self.session.identity()).await;
                    let next = if device.is_some() {
                        ConnectionState::Connecting
                    } else {
                        ConnectionState::Scanning
                    };
                    self.session.transition(next);
                }
                ConnectionState::Scanning => {
                    match self.scanner.scan(self.session.identity()).await {
                        Ok(Some(found)) => {
                            device = Some(found);
                            self.session.transition(ConnectionState::Connecting);
                        }
                        Ok(None) => {
                            info!(
                                "Mat not found, next scan in {:?}",
                                self.timing.scan_interval()
                            );
                            tokio::time::sleep(self.timing.scan_interval()).await;
                        }
                        Err(err) => {
                            warn!("Scan failed: {}", err);
                            tokio::time::sleep(self.timing.scan_interval()).await;
                        }
                    }
                }
                ConnectionState::Connecting => {
                    let Some(target) = device.clone() else {
                        self.session.transition(ConnectionState::Scanning);
                        continue;
                    };
                    match target.connect().await {
                        Ok(()) => {
                            info!("Connected to {}", target.address());
                            self.session.set_connected(Some(target.clone()));
                            tokio::time::sleep(self.timing.connect_settle()).await;
                            self.session
                                .transition(ConnectionState::ResolvingCharacteristics);
                        }
                        Err(err) => {
                            warn!("Connect to {} failed: {}", target.address(), err);
                            device = None;
                            self.session.transition(ConnectionState::Disconnected(
                                DisconnectReason::ConnectFailed,
                            ));
                        }
                    }
                }
                ConnectionState::ResolvingCharacteristics => {
                    let Some(target) = device.take() else {
                        self.session.transition(ConnectionState::Scanning);
                        continue;
                    };
                    match self.bring_up(target.clone()).await {
                        Ok(ready) => active = Some(ready),
                        Err(err) => {
                            warn!("Characteristic setup failed: {}", err);
                            self.session.set_connected(None);
                            if let Err(err) = target.disconnect().await {
                                debug!("Disconnect after failed setup: {}", err);
                            }
                            self.session.transition(ConnectionState::Disconnected(
                                DisconnectReason::CharacteristicsMissing,
                            ));
                        }
                    }
                }
                ConnectionState::Ready => match active.take() {
                    Some(mut current) => {
                        self.hold(&mut current).await;
                        self.tear_down(current).await;
                    }
                    None => {
                        self.session
                            .force_disconnect(DisconnectReason::ReadLoopExit);
                    }
                },
                ConnectionState::Disconnected(reason) => {
                    debug!("Disconnected ({}), scanning again", reason);
                    self.session.transition(ConnectionState::Scanning);
                }
            }
        }
    }

    async fn bring_up(&self, device: Arc<dyn BleDevice>) -> Result<Active, TransportError> {
        let established = self.setup.establish(device.clone()).await?;
        let drops = match device.disconnections().await {
            Ok(drops) => drops,
            Err(err) => {
                warn!("No disconnect events, relying on polling: {}", err);
                Box::pin(futures::stream::pending())
            }
        };

        self.session.set_link(Some(established.link.clone()));
        *self.reads.lock().unwrap_or_else(|e| e.into_inner()) = Some(established.reads.clone());
        self.session.transition(ConnectionState::Ready);

        let keepalive = KeepAlive::new(
            self.session.clone(),
            self.writer.clone(),
            self.timing.keepalive_initial(),
            self.timing.keepalive_interval(),
        )
        .start(&established.link);

        Ok(Active {
            device,
            established,
            drops,
            keepalive,
        })
    }

    /// Wait until the link is lost or something forced the session out of
    /// `Ready`
    async fn hold(&self, active: &mut Active) {
        let mut state = self.session.subscribe_state();
        let mut poll = tokio::time::interval(self.timing.idle_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                _ = left_ready(&mut state) => return,
                Some(()) = active.drops.next() => {
                    warn!("Peer dropped the link");
                    self.session.force_disconnect(DisconnectReason::PeerDropped);
                    return;
                }
                _ = poll.tick() => match active.device.is_connected().await {
                    Ok(true) => trace!("Link alive"),
                    Ok(false) => {
                        warn!("Link found down by idle poll");
                        self.session.force_disconnect(DisconnectReason::PeerDropped);
                        return;
                    }
                    Err(err) => {
                        warn!("Idle poll failed: {}", err);
                        self.session.force_disconnect(DisconnectReason::PeerDropped);
                        return;
                    }
                },
            }
        }
    }

    async fn tear_down(&self, active: Active) {
        if let Some(keepalive) = &active.keepalive {
            keepalive.cancel();
        }
        active.established.cancel();
        *self.reads.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.session.set_link(None);
        self.session.set_connected(None);
        if let Err(err) = active.device.disconnect().await {
            debug!("Disconnect during teardown: {}", err);
        }
        info!("Link to {} torn down", active.device.address());
    }
}
