//! BLE Scanner Module
//!
//! Finds the configured mat, either among the devices the adapter already
//! knows or through a fixed-length discovery window.

use crate::domain::identity::DeviceIdentity;
use crate::infrastructure::bluetooth::transport::{BleAdapter, BleDevice, TransportResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Scanner {
    adapter: Arc<dyn BleAdapter>,
    window: Duration,
}

impl Scanner {
    pub fn new(adapter: Arc<dyn BleAdapter>, window: Duration) -> Self {
        Self { adapter, window }
    }

    /// Handle the adapter already holds for the mat, without scanning
    pub async fn cached(&self, identity: &DeviceIdentity) -> Option<Arc<dyn BleDevice>> {
        match self.adapter.device(&identity.address).await {
            Ok(device) => {
                info!("Using cached handle for {}", device.address());
                Some(device)
            }
            Err(err) => {
                debug!("No cached handle for {}: {}", identity.address, err);
                None
            }
        }
    }

    /// Run one discovery window and return the mat if it was seen
    pub async fn scan(&self, identity: &DeviceIdentity) -> TransportResult<Option<Arc<dyn BleDevice>>> {
        info!("Scanning for {} ({:?})", identity.address, self.window);
        self.adapter.start_discovery().await?;
        tokio::time::sleep(self.window).await;
        if let Err(err) = self.adapter.stop_discovery().await {
            warn!("Failed to stop discovery: {}", err);
        }

        let addresses = self.adapter.discovered_addresses().await?;
        debug!("Discovered {} devices", addresses.len());

        let Some(address) = addresses
            .iter()
            .find(|candidate| identity.matches_address(candidate))
        else {
            return Ok(None);
        };

        info!("Found mat at {}", address);
        self.adapter.device(address).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{test_identity, MockAdapter, MockDevice};

    #[tokio::test(start_paused = true)]
    async fn test_scan_matches_normalized_address() {
        let other = MockDevice::new("11:22:33:44:55:66");
        let target = MockDevice::new("a4-c1-38-00-11-22");
        let adapter = MockAdapter::new(vec![other, target]);
        let scanner = Scanner::new(adapter.clone(), Duration::from_secs(4));

        let found = scanner.scan(&test_identity()).await.unwrap().unwrap();
        assert_eq!(found.address(), "a4-c1-38-00-11-22");
        assert_eq!(adapter.scans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_without_match() {
        let adapter = MockAdapter::new(vec![MockDevice::new("11:22:33:44:55:66")]);
        let scanner = Scanner::new(adapter, Duration::from_secs(4));

        let start = tokio::time::Instant::now();
        assert!(scanner.scan(&test_identity()).await.unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_lookup() {
        let adapter = MockAdapter::new(vec![MockDevice::new("A4:C1:38:00:11:22")]);
        let scanner = Scanner::new(adapter.clone(), Duration::from_secs(4));
        assert!(scanner.cached(&test_identity()).await.is_none());

        adapter.mark_cached();
        assert!(scanner.cached(&test_identity()).await.is_some());
        assert_eq!(adapter.scans(), 0);
    }
}
