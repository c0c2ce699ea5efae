//! Command Scheduler
//!
//! Turns consumer requests into control packet writes. Temperature requests
//! are debounced so that a drag across the dial produces a single write;
//! timer requests are written straight away.

use crate::domain::error::DeviceError;
use crate::domain::identity::TimerOff;
use crate::domain::levels::{clamp_timer_hours, timer_brightness};
use crate::domain::models::{CharacteristicRole, SessionEvent};
use crate::infrastructure::bluetooth::protocol::ControlPacket;
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::task::ScheduledTask;
use crate::infrastructure::bluetooth::writer::CharacteristicWriter;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// Debounced temperature write waiting to fire
struct PendingCommand {
    level: u8,
    celsius: u8,
    task: ScheduledTask,
}

pub struct CommandScheduler {
    session: Arc<Session>,
    writer: Arc<CharacteristicWriter>,
    debounce: Duration,
    pending: Mutex<Option<PendingCommand>>,
}

impl CommandScheduler {
    pub fn new(session: Arc<Session>, writer: Arc<CharacteristicWriter>, debounce: Duration) -> Self {
        Self {
            session,
            writer,
            debounce,
            pending: Mutex::new(None),
        }
    }

    /// Request a target temperature in °C.
    ///
    /// Returns once the write is scheduled; the write itself happens after
    /// the debounce window and reports failures as `CommandFailed` events.
    pub fn request_temperature(&self, celsius: f32) -> Result<(), DeviceError> {
        if !celsius.is_finite() {
            return Err(DeviceError::InvalidTemperature(celsius));
        }
        let (level, target) = self.session.levels().level_for(celsius);

        let snapshot = self.session.snapshot();
        if snapshot.last_confirmed_level == Some(level) && snapshot.target_temperature == target {
            // Returning to the confirmed value also retracts a pending change
            self.cancel_pending();
            debug!("{}°C (level {}) already confirmed, skipping", target, level);
            return Ok(());
        }

        let state = self.session.state();
        if !state.is_ready() {
            if level == 0 && !self.session.ever_connected() {
                debug!("Heat off requested before any connection, nothing to do");
                return Ok(());
            }
            return Err(DeviceError::NotReady(state));
        }

        let session = self.session.clone();
        let writer = self.writer.clone();
        let task = ScheduledTask::after(self.debounce, async move {
            // Detached so a superseding request cancels only the delay, never
            // a write that is already under way.
            tokio::spawn(write_temperature(session, writer, level, target));
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(PendingCommand {
            level,
            celsius: target,
            task,
        }) {
            previous.task.cancel();
            debug!(
                "Superseded pending {}°C (level {}) with {}°C (level {})",
                previous.celsius, previous.level, target, level
            );
        }
        Ok(())
    }

    /// Switch heating on (last remembered temperature) or off
    pub fn request_power(&self, on: bool) -> Result<(), DeviceError> {
        let celsius = if on {
            self.session
                .snapshot()
                .last_heat_temperature
                .unwrap_or_else(|| self.session.identity().variant.default_heat_temperature())
        } else {
            self.session.levels().min_temperature()
        };
        self.request_temperature(celsius as f32)
    }

    /// Write the timer immediately. Zero hours also switches the heat off.
    pub async fn request_timer_hours(&self, hours: i32) -> Result<(), DeviceError> {
        let hours = clamp_timer_hours(hours);
        let packet = if hours == 0 {
            match &self.session.identity().timer_off {
                TimerOff::Zero => ControlPacket::encode(0),
                TimerOff::Packet(bytes) => ControlPacket::from_bytes(*bytes),
            }
        } else {
            ControlPacket::encode(hours)
        };

        self.writer
            .safe_write(CharacteristicRole::Timer, packet, hours == 0)
            .await?;

        if self.session.ever_connected() {
            info!("Timer set to {}h", hours);
            let changed = self
                .session
                .update_snapshot(|snapshot| snapshot.apply_timer(hours));
            if changed.is_some() {
                self.session
                    .publish(SessionEvent::TimerBrightness(timer_brightness(hours)));
            }
        }

        if hours == 0 {
            self.request_power(false)?;
        }
        Ok(())
    }

    /// Resume the last timer (at least one hour) or stop it
    pub async fn request_timer_on(&self, on: bool) -> Result<(), DeviceError> {
        let hours = if on {
            self.session.snapshot().last_timer_hours.max(1)
        } else {
            0
        };
        self.request_timer_hours(hours as i32).await
    }

    /// Drop a pending temperature write, if any
    pub fn cancel_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.take() {
            previous.task.cancel();
        }
    }
}

async fn write_temperature(
    session: Arc<Session>,
    writer: Arc<CharacteristicWriter>,
    level: u8,
    celsius: u8,
) {
    let packet = ControlPacket::encode(level);
    match writer
        .safe_write(CharacteristicRole::Temperature, packet, level == 0)
        .await
    {
        Ok(()) => {
            info!("Temperature set to {}°C (level {})", celsius, level);
            session.update_snapshot(|snapshot| snapshot.apply_level(level, celsius));
        }
        Err(err) => {
            error!("Failed to set temperature {}°C: {}", celsius, err);
            session.publish(SessionEvent::CommandFailed {
                command: format!("temperature {}°C", celsius),
                error: err.to_string(),
            });
        }
    }
}
