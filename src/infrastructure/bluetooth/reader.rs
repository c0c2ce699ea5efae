//! Read Sequencer
//!
//! Reads are queued and performed one at a time by a single worker per
//! connection, so concurrent refresh requests never race on the link.

use crate::domain::error::DeviceError;
use crate::domain::models::CharacteristicRole;
use crate::infrastructure::bluetooth::dispatcher::Inbound;
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::transport::BleDevice;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub characteristic: Uuid,
    pub role: CharacteristicRole,
}

/// Producer side of the read queue
#[derive(Clone)]
pub struct ReadQueue {
    tx: mpsc::UnboundedSender<ReadRequest>,
}

impl ReadQueue {
    pub fn enqueue(&self, characteristic: Uuid, role: CharacteristicRole) -> Result<(), DeviceError> {
        self.tx
            .send(ReadRequest {
                characteristic,
                role,
            })
            .map_err(|_| DeviceError::SessionClosed)
    }
}

pub struct ReadSequencer {
    session: Arc<Session>,
    device: Arc<dyn BleDevice>,
    inbound: mpsc::Sender<Inbound>,
    gap: Duration,
}

impl ReadSequencer {
    pub fn new(
        session: Arc<Session>,
        device: Arc<dyn BleDevice>,
        inbound: mpsc::Sender<Inbound>,
        gap: Duration,
    ) -> Self {
        Self {
            session,
            device,
            inbound,
            gap,
        }
    }

    /// Start the worker. It stops when every `ReadQueue` is dropped, the
    /// dispatcher goes away, or the handle is aborted.
    pub fn spawn(self) -> (ReadQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (ReadQueue { tx }, handle)
    }

    async fn run(self, mut requests: mpsc::UnboundedReceiver<ReadRequest>) {
        while let Some(request) = requests.recv().await {
            let result = {
                let _io = self.session.io_lock().lock().await;
                self.device.read(request.characteristic).await
            };

            match result {
                Ok(payload) => {
                    debug!("Read {} ({}): {:02X?}", request.role, request.characteristic, payload);
                    let inbound = Inbound {
                        role: request.role,
                        payload,
                    };
                    if self.inbound.send(inbound).await.is_err() {
                        debug!("Dispatcher gone, read sequencer stopping");
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        "Read of {} ({}) failed, skipping: {}",
                        request.role, request.characteristic, err
                    );
                }
            }

            tokio::time::sleep(self.gap).await;
        }
    }
}
