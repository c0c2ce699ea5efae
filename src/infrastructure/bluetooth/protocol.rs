//! Heating Mat Wire Protocol
//!
//! Every command and every state report is a 4-byte control packet. The
//! value byte is followed by its one's complement, and the pair is repeated
//! for the vendor's left/right zones even though this mat has a single zone.

use std::fmt;
use thiserror::Error;

/// Length of every control packet on the wire
pub const PACKET_LEN: usize = 4;

/// Why an inbound payload could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short: {0} bytes (expected 4)")]
    TooShort(usize),
    #[error("checksum mismatch: value 0x{value:02X}, checksum 0x{checksum:02X}")]
    Corrupted { value: u8, checksum: u8 },
}

/// A 4-byte `[v, chk, v, chk]` control packet
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ControlPacket([u8; PACKET_LEN]);

impl ControlPacket {
    /// Build the packet carrying `level`
    pub fn encode(level: u8) -> Self {
        let chk = checksum(level);
        Self([level, chk, level, chk])
    }

    /// Wrap a verbatim vendor packet (e.g. a dedicated OFF command)
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ControlPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlPacket({:02X?})", self.0)
    }
}

/// One's complement checksum of a value byte
pub fn checksum(value: u8) -> u8 {
    0xFF - value
}

/// Decode the level carried by an inbound payload.
///
/// Only the first zone is read. Payloads shorter than a full packet are
/// rejected rather than partially interpreted.
pub fn decode(bytes: &[u8]) -> Result<u8, PacketError> {
    if bytes.len() < PACKET_LEN {
        return Err(PacketError::TooShort(bytes.len()));
    }
    let (value, chk) = (bytes[0], bytes[1]);
    if chk != checksum(value) {
        return Err(PacketError::Corrupted {
            value,
            checksum: chk,
        });
    }
    Ok(value)
}

/// Extract an attribute protocol error code from a backend error message.
///
/// BlueZ reports these as e.g. `"Operation failed with ATT error: 0x0e"`.
pub fn parse_att_code(message: &str) -> Option<u8> {
    let lower = message.to_ascii_lowercase();
    let start = lower.find("att error")?;
    let rest = &lower[start..];
    let hex_start = rest.find("0x")? + 2;
    let digits: String = rest[hex_start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .take(2)
        .collect();
    u8::from_str_radix(&digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        assert_eq!(ControlPacket::encode(3).as_bytes(), &[0x03, 0xFC, 0x03, 0xFC]);
        assert_eq!(ControlPacket::encode(0).as_bytes(), &[0x00, 0xFF, 0x00, 0xFF]);
        assert_eq!(ControlPacket::encode(0xFF).as_bytes(), &[0xFF, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_decode_every_level() {
        for level in 0..=u8::MAX {
            assert_eq!(decode(ControlPacket::encode(level).as_bytes()), Ok(level));
        }
    }

    #[test]
    fn test_checksum_mismatch_is_corrupted() {
        for value in 0..=u8::MAX {
            for chk in [0x00u8, 0x7F, 0xFE, value] {
                if chk == checksum(value) {
                    continue;
                }
                assert_eq!(
                    decode(&[value, chk, value, chk]),
                    Err(PacketError::Corrupted {
                        value,
                        checksum: chk
                    })
                );
            }
        }
    }

    #[test]
    fn test_short_packet_rejected() {
        assert_eq!(decode(&[0x03, 0xFC]), Err(PacketError::TooShort(2)));
        assert_eq!(decode(&[]), Err(PacketError::TooShort(0)));
    }

    #[test]
    fn test_extra_trailing_bytes_ignored() {
        assert_eq!(decode(&[0x02, 0xFD, 0x02, 0xFD, 0x99]), Ok(2));
    }

    #[test]
    fn test_parse_att_code() {
        assert_eq!(
            parse_att_code("le-connection-abort-by-local: Operation failed with ATT error: 0x0e"),
            Some(0x0E)
        );
        assert_eq!(parse_att_code("ATT error 0x0E: unlikely"), Some(0x0E));
        assert_eq!(parse_att_code("Not connected"), None);
        assert_eq!(parse_att_code("ATT error: none"), None);
    }
}
