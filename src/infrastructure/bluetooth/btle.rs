//! btleplug Backend
//!
//! Implements the transport traits on top of the host's native BLE stack
//! (BlueZ, CoreBluetooth or WinRT, whichever btleplug selects).

use crate::domain::error::TransportError;
use crate::domain::identity::normalize_address;
use crate::infrastructure::bluetooth::protocol::parse_att_code;
use crate::infrastructure::bluetooth::transport::{
    BleAdapter, BleDevice, EventStream, Notification, TransportResult,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => Self::NotConnected,
            btleplug::Error::DeviceNotFound => Self::DeviceNotFound("unknown".to_string()),
            other => {
                let message = other.to_string();
                match parse_att_code(&message) {
                    Some(code) => Self::Att { code, message },
                    None => Self::Backend(message),
                }
            }
        }
    }
}

/// Adapter selected by name (e.g. "hci0"), or the first one found
pub struct BtleplugAdapter {
    adapter: Adapter,
}

impl BtleplugAdapter {
    pub async fn new(name: Option<&str>) -> TransportResult<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        let adapter = match name {
            None => adapters.into_iter().next().ok_or(TransportError::NoAdapter)?,
            Some(name) => {
                let mut selected = None;
                for adapter in adapters {
                    let info = adapter.adapter_info().await?;
                    debug!("Found adapter: {}", info);
                    if info.contains(name) {
                        selected = Some(adapter);
                        break;
                    }
                }
                selected.ok_or_else(|| TransportError::AdapterNotFound(name.to_string()))?
            }
        };

        info!("Using Bluetooth adapter: {}", adapter.adapter_info().await?);
        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, address: &str) -> TransportResult<Option<Peripheral>> {
        let target = normalize_address(address);
        for peripheral in self.adapter.peripherals().await? {
            if normalize_address(&peripheral.address().to_string()) == target {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start_discovery(&self) -> TransportResult<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_discovery(&self) -> TransportResult<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn discovered_addresses(&self) -> TransportResult<Vec<String>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .iter()
            .map(|p| p.address().to_string())
            .collect())
    }

    async fn device(&self, address: &str) -> TransportResult<Arc<dyn BleDevice>> {
        let peripheral = self
            .find_peripheral(address)
            .await?
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?;
        Ok(Arc::new(BtleplugDevice {
            adapter: self.adapter.clone(),
            peripheral,
        }))
    }
}

struct BtleplugDevice {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugDevice {
    fn characteristic(&self, uuid: Uuid) -> TransportResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl BleDevice for BtleplugDevice {
    fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    async fn connect(&self) -> TransportResult<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> TransportResult<bool> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn resolve_service(&self, service: Uuid) -> TransportResult<Vec<Uuid>> {
        self.peripheral.discover_services().await?;
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or(TransportError::ServiceNotFound(service))?;
        Ok(service.characteristics.iter().map(|c| c.uuid).collect())
    }

    async fn read(&self, characteristic: Uuid) -> TransportResult<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> TransportResult<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> TransportResult<EventStream<Notification>> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|n| Notification {
            characteristic: n.uuid,
            value: n.value,
        })))
    }

    async fn disconnections(&self) -> TransportResult<EventStream<()>> {
        let id = self.peripheral.id();
        let events = self.adapter.events().await?;
        Ok(Box::pin(events.filter_map(move |event| {
            let matched = matches!(event, CentralEvent::DeviceDisconnected(ref peer) if *peer == id);
            async move { matched.then_some(()) }
        })))
    }
}
