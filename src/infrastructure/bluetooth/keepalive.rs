//! Keep-Alive Heartbeat
//!
//! Re-sends the vendor init payload on the set characteristic while the
//! link is ready, so the mat does not time out an idle connection.

use crate::infrastructure::bluetooth::session::{left_ready, Link, Session};
use crate::infrastructure::bluetooth::task::ScheduledTask;
use crate::infrastructure::bluetooth::writer::CharacteristicWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct KeepAlive {
    session: Arc<Session>,
    writer: Arc<CharacteristicWriter>,
    initial_delay: Duration,
    interval: Duration,
}

impl KeepAlive {
    pub fn new(
        session: Arc<Session>,
        writer: Arc<CharacteristicWriter>,
        initial_delay: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            writer,
            initial_delay,
            interval,
        }
    }

    /// Start beating on `link`.
    ///
    /// Returns `None` when the device has no set characteristic or no payload
    /// is configured. The task ends by itself as soon as the session leaves
    /// `Ready`.
    pub fn start(self, link: &Link) -> Option<ScheduledTask> {
        let Some(set) = link.set else {
            debug!("No set characteristic, keep-alive disabled");
            return None;
        };
        let Some(payload) = self.session.identity().init_payload.clone() else {
            debug!("No init payload configured, keep-alive disabled");
            return None;
        };
        let device = link.device.clone();
        let mut state = self.session.subscribe_state();

        Some(ScheduledTask::spawn(async move {
            let beat = async {
                tokio::time::sleep(self.initial_delay).await;
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match self.writer.write_raw(device.as_ref(), set, &payload).await {
                        Ok(()) => debug!("Keep-alive sent"),
                        Err(err) => warn!("Keep-alive failed: {}", err),
                    }
                }
            };

            tokio::select! {
                _ = beat => {}
                _ = left_ready(&mut state) => debug!("Keep-alive stopped"),
            }
        }))
    }
}
