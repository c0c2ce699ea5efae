//! Connection states, the device snapshot and the events published to consumers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the session left `Ready` (or never reached it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    ConnectFailed,
    CharacteristicsMissing,
    PeerDropped,
    WriteFatal,
    ReadLoopExit,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectFailed => "connect_failed",
            Self::CharacteristicsMissing => "characteristics_missing",
            Self::PeerDropped => "peer_dropped",
            Self::WriteFatal => "write_fatal",
            Self::ReadLoopExit => "read_loop_exit",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle of the managed mat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    ResolvingCharacteristics,
    Ready,
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting => f.write_str("connecting"),
            Self::ResolvingCharacteristics => f.write_str("resolving_characteristics"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnected(reason) => write!(f, "disconnected({})", reason),
        }
    }
}

/// Semantic role of a mandatory characteristic.
///
/// Bound once when a subscription or read is created, so inbound payloads
/// never need their role re-derived from a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    Temperature,
    Timer,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature => f.write_str("temperature"),
            Self::Timer => f.write_str("timer"),
        }
    }
}

/// Last-known logical state of the mat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Requested heat in °C
    pub target_temperature: u8,
    /// Mirrors the target once the device confirms it
    pub current_temperature: u8,
    pub heating: bool,
    pub timer_hours: u8,
    pub timer_on: bool,
    /// Last level confirmed by the device or by a successful write
    pub last_confirmed_level: Option<u8>,
    /// Resumed by `request_power(true)`
    pub last_heat_temperature: Option<u8>,
    /// Resumed by `request_timer_on(true)`
    pub last_timer_hours: u8,
}

impl DeviceSnapshot {
    pub fn new(off_temperature: u8) -> Self {
        Self {
            target_temperature: off_temperature,
            current_temperature: off_temperature,
            heating: false,
            timer_hours: 0,
            timer_on: false,
            last_confirmed_level: None,
            last_heat_temperature: None,
            last_timer_hours: 0,
        }
    }

    /// Apply a confirmed heat level
    pub fn apply_level(&mut self, level: u8, celsius: u8) {
        self.target_temperature = celsius;
        self.current_temperature = celsius;
        self.heating = level > 0;
        if self.heating {
            self.last_heat_temperature = Some(celsius);
        }
        self.last_confirmed_level = Some(level);
    }

    /// Apply confirmed timer hours
    pub fn apply_timer(&mut self, hours: u8) {
        self.timer_hours = hours;
        self.timer_on = hours > 0;
        if hours > 0 {
            self.last_timer_hours = hours;
        }
    }
}

/// Events published to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SnapshotChanged(DeviceSnapshot),
    /// Timer expressed as a 0-100 percentage
    TimerBrightness(u8),
    ConnectionChanged(ConnectionState),
    CommandFailed { command: String, error: String },
}
