//! Characteristic Writer
//!
//! Every write to the mat goes through here so that writes never overlap
//! and each is followed by the stabilization delay the hardware needs.

use crate::domain::error::{DeviceError, TransportError};
use crate::domain::models::{CharacteristicRole, DisconnectReason};
use crate::domain::settings::SessionSettings;
use crate::infrastructure::bluetooth::protocol::ControlPacket;
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::transport::BleDevice;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub struct CharacteristicWriter {
    session: Arc<Session>,
    max_attempts: u32,
    retry_delay: Duration,
    stabilize: Duration,
    fatal_att_code: u8,
}

impl CharacteristicWriter {
    pub fn new(session: Arc<Session>, settings: &SessionSettings) -> Self {
        Self {
            session,
            max_attempts: settings.write_retries.max(1),
            retry_delay: settings.write_retry_delay(),
            stabilize: settings.write_stabilize(),
            fatal_att_code: settings.fatal_att_code,
        }
    }

    /// Write `packet` without response, retrying transient failures.
    ///
    /// `is_off` marks packets that switch something off: those succeed
    /// trivially when the mat has never been connected.
    ///
    /// A fatal ATT code or running out of attempts forces the session out of
    /// `Ready`; the connection loop performs the actual teardown.
    pub async fn safe_write(
        &self,
        role: CharacteristicRole,
        packet: ControlPacket,
        is_off: bool,
    ) -> Result<(), DeviceError> {
        if let Err(err) = self.session.ready_link() {
            if is_off && !self.session.ever_connected() {
                debug!("Skipping {} OFF write, device was never connected", role);
                return Ok(());
            }
            return Err(err);
        }

        let _io = self.session.io_lock().lock().await;
        let mut attempt = 0;
        loop {
            // Taken under the lock: a reconnect may have replaced the link
            // while this write was queued
            let link = self.session.ready_link()?;
            let characteristic = match role {
                CharacteristicRole::Temperature => link.temperature,
                CharacteristicRole::Timer => link.timer,
            };

            attempt += 1;
            match link.device.write(characteristic, packet.as_bytes()).await {
                Ok(()) => {
                    debug!("Wrote {:?} to {}", packet, characteristic);
                    tokio::time::sleep(self.stabilize).await;
                    return Ok(());
                }
                Err(err) if err.att_code() == Some(self.fatal_att_code) => {
                    error!("Fatal ATT error writing {}: {}", characteristic, err);
                    self.session.force_disconnect(DisconnectReason::WriteFatal);
                    return Err(DeviceError::FatalAttribute(err));
                }
                Err(err) if attempt >= self.max_attempts => {
                    error!(
                        "Write to {} failed after {} attempts: {}",
                        characteristic, attempt, err
                    );
                    self.session.force_disconnect(DisconnectReason::WriteFatal);
                    return Err(DeviceError::WriteExhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        "Write attempt {}/{} to {} failed: {}",
                        attempt, self.max_attempts, characteristic, err
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Single fire-and-forget write of a raw payload (init, keep-alive).
    ///
    /// Shares the I/O lock with `safe_write` but never retries and never
    /// changes the connection state.
    pub async fn write_raw(
        &self,
        device: &dyn BleDevice,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let _io = self.session.io_lock().lock().await;
        device.write(characteristic, payload).await?;
        tokio::time::sleep(self.stabilize).await;
        Ok(())
    }
}
