//! In-memory transport used by the unit tests

use crate::domain::error::TransportError;
use crate::domain::identity::{normalize_address, DeviceIdentity, TimerOff};
use crate::domain::levels::DeviceVariant;
use crate::domain::models::SessionEvent;
use crate::domain::settings::SessionSettings;
use crate::infrastructure::bluetooth::session::{Link, Session};
use crate::infrastructure::bluetooth::transport::{
    BleAdapter, BleDevice, EventStream, Notification, TransportResult,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub const ADDRESS: &str = "A4:C1:38:00:11:22";
pub const SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);
pub const TEMPERATURE: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);
pub const TIMER: Uuid = Uuid::from_u128(0x0000ffe2_0000_1000_8000_00805f9b34fb);
pub const SET: Uuid = Uuid::from_u128(0x0000ffe3_0000_1000_8000_00805f9b34fb);
pub const INIT_PAYLOAD: [u8; 4] = [0xAA, 0x55, 0x01, 0x00];

pub fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        address: normalize_address(ADDRESS),
        service_uuid: SERVICE,
        temperature_uuid: TEMPERATURE,
        timer_uuid: TIMER,
        set_uuid: Some(SET),
        init_payload: Some(INIT_PAYLOAD.to_vec()),
        adapter: None,
        variant: DeviceVariant::Stepped,
        timer_off: TimerOff::Zero,
    }
}

/// Session settings with the production delays
pub fn test_settings() -> SessionSettings {
    SessionSettings::default()
}

/// Session wired to `device` and already `Ready`
pub fn ready_session(
    device: Arc<MockDevice>,
) -> (Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(test_identity(), tx));
    session.set_link(Some(Link {
        device,
        temperature: TEMPERATURE,
        timer: TIMER,
        set: Some(SET),
    }));
    session.transition(crate::domain::models::ConnectionState::Ready);
    (session, rx)
}

fn broadcast_stream<T: Clone + Send + 'static>(rx: broadcast::Receiver<T>) -> EventStream<T> {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

pub struct MockDevice {
    address: String,
    connected: AtomicBool,
    connect_error: Mutex<Option<TransportError>>,
    characteristics: Mutex<Option<Vec<Uuid>>>,
    write_script: Mutex<VecDeque<TransportError>>,
    write_failure: Mutex<Option<TransportError>>,
    write_attempts: AtomicU32,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    read_values: Mutex<HashMap<Uuid, Vec<u8>>>,
    read_failure: Mutex<Option<TransportError>>,
    reads: Mutex<Vec<Uuid>>,
    subscribed: Mutex<Vec<Uuid>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    notify_tx: Mutex<broadcast::Sender<Notification>>,
    disconnect_tx: broadcast::Sender<()>,
}

impl MockDevice {
    pub fn new(address: &str) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(64);
        let (disconnect_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            address: address.to_string(),
            connected: AtomicBool::new(false),
            connect_error: Mutex::new(None),
            characteristics: Mutex::new(Some(vec![TEMPERATURE, TIMER, SET])),
            write_script: Mutex::new(VecDeque::new()),
            write_failure: Mutex::new(None),
            write_attempts: AtomicU32::new(0),
            writes: Mutex::new(Vec::new()),
            read_values: Mutex::new(HashMap::new()),
            read_failure: Mutex::new(None),
            reads: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            notify_tx: Mutex::new(notify_tx),
            disconnect_tx,
        })
    }

    /// `None` removes the service entirely
    pub fn set_characteristics(&self, characteristics: Option<Vec<Uuid>>) {
        *lock(&self.characteristics) = characteristics;
    }

    pub fn fail_connect(&self, error: Option<TransportError>) {
        *lock(&self.connect_error) = error;
    }

    /// Fail every write with `error` until cleared
    pub fn fail_writes(&self, error: Option<TransportError>) {
        *lock(&self.write_failure) = error;
    }

    /// Fail only the next write with `error`
    pub fn fail_next_write(&self, error: TransportError) {
        lock(&self.write_script).push_back(error);
    }

    pub fn fail_reads(&self, error: Option<TransportError>) {
        *lock(&self.read_failure) = error;
    }

    pub fn set_read_value(&self, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.read_values).insert(characteristic, value);
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Successful writes in order
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.writes).clone()
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn reads(&self) -> Vec<Uuid> {
        lock(&self.reads).clone()
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        lock(&self.subscribed).clone()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Disconnect requests made by the session
    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn notify(&self, characteristic: Uuid, value: &[u8]) {
        let _ = lock(&self.notify_tx).send(Notification {
            characteristic,
            value: value.to_vec(),
        });
    }

    /// End every open notification stream; later subscribers get a new one
    pub fn end_notifications(&self) {
        let (fresh, _) = broadcast::channel(64);
        *lock(&self.notify_tx) = fresh;
    }

    /// Simulate the peer dropping the link
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.disconnect_tx.send(());
    }
}

#[async_trait]
impl BleDevice for MockDevice {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.connect_error).clone() {
            return Err(error);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> TransportResult<bool> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn resolve_service(&self, service: Uuid) -> TransportResult<Vec<Uuid>> {
        if service != SERVICE {
            return Err(TransportError::ServiceNotFound(service));
        }
        lock(&self.characteristics)
            .clone()
            .ok_or(TransportError::ServiceNotFound(service))
    }

    async fn read(&self, characteristic: Uuid) -> TransportResult<Vec<u8>> {
        lock(&self.reads).push(characteristic);
        if let Some(error) = lock(&self.read_failure).clone() {
            return Err(error);
        }
        lock(&self.read_values)
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> TransportResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.write_script).pop_front() {
            return Err(error);
        }
        if let Some(error) = lock(&self.write_failure).clone() {
            return Err(error);
        }
        lock(&self.writes).push((characteristic, value.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<()> {
        lock(&self.subscribed).push(characteristic);
        Ok(())
    }

    async fn notifications(&self) -> TransportResult<EventStream<Notification>> {
        Ok(broadcast_stream(lock(&self.notify_tx).subscribe()))
    }

    async fn disconnections(&self) -> TransportResult<EventStream<()>> {
        Ok(broadcast_stream(self.disconnect_tx.subscribe()))
    }
}

pub struct MockAdapter {
    devices: Mutex<Vec<Arc<MockDevice>>>,
    /// Devices are only handed out after a discovery run, unless cached
    visible: AtomicBool,
    scans: AtomicU32,
}

impl MockAdapter {
    pub fn new(devices: Vec<Arc<MockDevice>>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            visible: AtomicBool::new(false),
            scans: AtomicU32::new(0),
        })
    }

    /// Pretend the host already knows the devices before any scan
    pub fn mark_cached(&self) {
        self.visible.store(true, Ordering::SeqCst);
    }

    pub fn add_device(&self, device: Arc<MockDevice>) {
        lock(&self.devices).push(device);
    }

    pub fn scans(&self) -> u32 {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start_discovery(&self) -> TransportResult<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.visible.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn discovered_addresses(&self) -> TransportResult<Vec<String>> {
        if !self.visible.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(lock(&self.devices).iter().map(|d| d.address()).collect())
    }

    async fn device(&self, address: &str) -> TransportResult<Arc<dyn BleDevice>> {
        if !self.visible.load(Ordering::SeqCst) {
            return Err(TransportError::DeviceNotFound(address.to_string()));
        }
        let target = normalize_address(address);
        lock(&self.devices)
            .iter()
            .find(|d| normalize_address(&d.address()) == target)
            .map(|d| d.clone() as Arc<dyn BleDevice>)
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }
}
