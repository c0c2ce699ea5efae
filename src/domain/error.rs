use crate::domain::models::ConnectionState;
use thiserror::Error;
use uuid::Uuid;

/// Invalid or missing configuration. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing mandatory setting `{0}`")]
    Missing(&'static str),
    #[error("invalid UUID for `{field}`: {value}")]
    InvalidUuid { field: &'static str, value: String },
    #[error("invalid Bluetooth address: {0}")]
    InvalidAddress(String),
    #[error("invalid hex payload for `{field}`: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("`{field}` must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Failure reported by the BLE transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("Bluetooth adapter `{0}` not found")]
    AdapterNotFound(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("device not connected")]
    NotConnected,
    #[error("ATT error 0x{code:02X}: {message}")]
    Att { code: u8, message: String },
    #[error("{0}")]
    Backend(String),
}

impl TransportError {
    /// Attribute protocol error code, when the backend reported one
    pub fn att_code(&self) -> Option<u8> {
        match self {
            Self::Att { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failure surfaced to the consumer of the device session
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device is not ready (state: {0})")]
    NotReady(ConnectionState),
    #[error("write failed after {attempts} attempts: {source}")]
    WriteExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("fatal attribute error, link dropped: {0}")]
    FatalAttribute(#[source] TransportError),
    #[error("device session has shut down")]
    SessionClosed,
    #[error("temperature must be a finite number, got {0}")]
    InvalidTemperature(f32),
}

impl DeviceError {
    /// Whether the consumer should surface a "service communication failure"
    pub fn is_communication_failure(&self) -> bool {
        !matches!(self, Self::SessionClosed | Self::InvalidTemperature(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_att_code() {
        let err = TransportError::Att {
            code: 0x0E,
            message: "unlikely".to_string(),
        };
        assert_eq!(err.att_code(), Some(0x0E));
        assert_eq!(err.to_string(), "ATT error 0x0E: unlikely");
        assert_eq!(TransportError::NotConnected.att_code(), None);
    }

    #[test]
    fn test_communication_failure() {
        let err = DeviceError::NotReady(ConnectionState::Scanning);
        assert!(err.is_communication_failure());
        assert!(!DeviceError::SessionClosed.is_communication_failure());
        assert!(!DeviceError::InvalidTemperature(f32::NAN).is_communication_failure());
    }
}
