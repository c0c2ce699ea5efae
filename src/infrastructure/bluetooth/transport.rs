//! BLE Transport Boundary
//!
//! The session only talks to the radio through these traits. The btleplug
//! backend lives in [`super::btle`]; tests use an in-memory mock.

use crate::domain::error::TransportError;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

pub type TransportResult<T> = Result<T, TransportError>;

/// Stream of transport events, detached from the device it came from
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A value-changed notification from the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// Host Bluetooth adapter
#[async_trait]
pub trait BleAdapter: Send + Sync {
    async fn start_discovery(&self) -> TransportResult<()>;

    async fn stop_discovery(&self) -> TransportResult<()>;

    /// Addresses of every peripheral seen so far, in the adapter's format
    async fn discovered_addresses(&self) -> TransportResult<Vec<String>>;

    /// Handle for a peripheral the adapter already knows about
    async fn device(&self, address: &str) -> TransportResult<Arc<dyn BleDevice>>;
}

/// A single GATT peripheral
#[async_trait]
pub trait BleDevice: Send + Sync {
    fn address(&self) -> String;

    async fn connect(&self) -> TransportResult<()>;

    async fn disconnect(&self) -> TransportResult<()>;

    async fn is_connected(&self) -> TransportResult<bool>;

    /// Discover `service` and list the UUIDs of its characteristics
    async fn resolve_service(&self, service: Uuid) -> TransportResult<Vec<Uuid>>;

    async fn read(&self, characteristic: Uuid) -> TransportResult<Vec<u8>>;

    /// Write without response; the mat never acknowledges control packets
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> TransportResult<()>;

    /// Enable value-changed notifications on `characteristic`
    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<()>;

    /// Every notification from this peripheral, across characteristics
    async fn notifications(&self) -> TransportResult<EventStream<Notification>>;

    /// Yields once each time the peer drops the link
    async fn disconnections(&self) -> TransportResult<EventStream<()>>;
}
