//! Notification Dispatcher
//!
//! Sole consumer of inbound payloads, whether they arrived as notifications
//! or as results of sequenced reads. Runs as one task so snapshot updates
//! from the radio are applied in order.

use crate::domain::identity::TimerOff;
use crate::domain::levels::{timer_brightness, MAX_TIMER_HOURS};
use crate::domain::models::{CharacteristicRole, DeviceSnapshot, SessionEvent};
use crate::infrastructure::bluetooth::protocol::{self, PACKET_LEN};
use crate::infrastructure::bluetooth::session::Session;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Depth of the inbound queue between the radio and the dispatcher
pub const INBOUND_CAPACITY: usize = 64;

/// Raw payload tagged with the role of the characteristic it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub role: CharacteristicRole,
    pub payload: Vec<u8>,
}

pub struct NotificationDispatcher {
    session: Arc<Session>,
}

impl NotificationDispatcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Drain `inbound` until every sender is gone
    pub fn spawn(self, mut inbound: mpsc::Receiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                self.dispatch(message.role, &message.payload);
            }
            debug!("Inbound channel closed, dispatcher stopping");
        })
    }

    /// Apply one payload. Returns the new snapshot when it changed.
    pub fn dispatch(&self, role: CharacteristicRole, payload: &[u8]) -> Option<DeviceSnapshot> {
        trace!("Inbound {} payload: {:02X?}", role, payload);
        match role {
            CharacteristicRole::Temperature => self.apply_temperature(payload),
            CharacteristicRole::Timer => self.apply_timer(payload),
        }
    }

    fn apply_temperature(&self, payload: &[u8]) -> Option<DeviceSnapshot> {
        let level = self.decode(CharacteristicRole::Temperature, payload)?;
        let Some(celsius) = self.session.levels().celsius_for(level) else {
            warn!("Ignoring unknown heat level {}", level);
            return None;
        };
        self.session
            .update_snapshot(|snapshot| snapshot.apply_level(level, celsius))
    }

    fn apply_timer(&self, payload: &[u8]) -> Option<DeviceSnapshot> {
        let hours = if self.is_timer_off_packet(payload) {
            0
        } else {
            let hours = self.decode(CharacteristicRole::Timer, payload)?;
            if hours > MAX_TIMER_HOURS {
                warn!("Ignoring out of range timer value {}", hours);
                return None;
            }
            hours
        };

        let changed = self
            .session
            .update_snapshot(|snapshot| snapshot.apply_timer(hours));
        if changed.is_some() {
            self.session
                .publish(SessionEvent::TimerBrightness(timer_brightness(hours)));
        }
        changed
    }

    fn is_timer_off_packet(&self, payload: &[u8]) -> bool {
        match &self.session.identity().timer_off {
            TimerOff::Packet(off) => payload.len() >= PACKET_LEN && payload[..PACKET_LEN] == off[..],
            TimerOff::Zero => false,
        }
    }

    fn decode(&self, role: CharacteristicRole, payload: &[u8]) -> Option<u8> {
        match protocol::decode(payload) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("Dropping {} payload {:02X?}: {}", role, payload, err);
                None
            }
        }
    }
}
