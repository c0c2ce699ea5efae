//! Validated, immutable identity of the managed mat

use crate::domain::error::ConfigError;
use crate::domain::levels::DeviceVariant;
use crate::domain::settings::DeviceSettings;
use data_encoding::HEXLOWER_PERMISSIVE;
use uuid::Uuid;

/// How a zero-hour timer is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOff {
    /// Encoded level 0
    Zero,
    /// Vendor-specific packet, sent verbatim
    Packet([u8; 4]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Uppercase hex, no separators
    pub address: String,
    pub service_uuid: Uuid,
    pub temperature_uuid: Uuid,
    pub timer_uuid: Uuid,
    pub set_uuid: Option<Uuid>,
    pub init_payload: Option<Vec<u8>>,
    pub adapter: Option<String>,
    pub variant: DeviceVariant,
    pub timer_off: TimerOff,
}

impl DeviceIdentity {
    pub fn from_settings(settings: &DeviceSettings) -> Result<Self, ConfigError> {
        let address = required("address", &settings.address)?;
        let address = normalize_address(address);
        if address.len() != 12 || !address.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidAddress(settings.address.clone()));
        }

        let service_uuid = uuid_field("service_uuid", &settings.service_uuid)?;
        let temperature_uuid =
            uuid_field("temperature_char_uuid", &settings.temperature_char_uuid)?;
        let timer_uuid = uuid_field("timer_char_uuid", &settings.timer_char_uuid)?;

        let set_uuid = match non_empty(settings.set_char_uuid.as_deref()) {
            Some(value) => Some(uuid_field("set_char_uuid", value)?),
            None => None,
        };
        let init_payload = match non_empty(settings.init_payload.as_deref()) {
            Some(value) => Some(hex_field("init_payload", value)?),
            None => None,
        };
        let timer_off = match non_empty(settings.timer_off_packet.as_deref()) {
            Some(value) => {
                let bytes = hex_field("timer_off_packet", value)?;
                let packet: [u8; 4] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| ConfigError::InvalidLength {
                            field: "timer_off_packet",
                            expected: 4,
                            actual: bytes.len(),
                        })?;
                TimerOff::Packet(packet)
            }
            None => TimerOff::Zero,
        };

        Ok(Self {
            address,
            service_uuid,
            temperature_uuid,
            timer_uuid,
            set_uuid,
            init_payload,
            adapter: non_empty(settings.adapter.as_deref()).map(str::to_string),
            variant: settings.variant,
            timer_off,
        })
    }

    /// Whether `candidate` names this device, regardless of separators or case
    pub fn matches_address(&self, candidate: &str) -> bool {
        normalize_address(candidate) == self.address
    }
}

/// Uppercase a MAC address and strip separators ("a4:c1-38" -> "A4C138")
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ConfigError> {
    non_empty(Some(value)).ok_or(ConfigError::Missing(field))
}

fn uuid_field(field: &'static str, value: &str) -> Result<Uuid, ConfigError> {
    let value = required(field, value)?;
    Uuid::parse_str(value).map_err(|_| ConfigError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}

fn hex_field(field: &'static str, value: &str) -> Result<Vec<u8>, ConfigError> {
    let cleaned: String = value
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    HEXLOWER_PERMISSIVE
        .decode(cleaned.as_bytes())
        .map_err(|_| ConfigError::InvalidHex {
            field,
            value: value.to_string(),
        })
}
