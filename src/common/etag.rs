use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::errors::EngineError;

/// 16-byte opaque version stamp produced by the external document store.
///
/// The engine never interprets its contents beyond byte-wise ordering;
/// commits record the highest etag seen in a batch as a UTF-8 hex string
/// in the commit user-data.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Etag([u8; 16]);

impl Etag {
    pub fn from_bytes(bytes: [u8; 16]) -> Etag {
        Etag(bytes)
    }

    /// Builds an etag whose trailing bytes carry `value` big-endian.
    /// Preserves byte-wise ordering of the counter, which is all the
    /// engine relies on.
    pub fn from_counter(value: u64) -> Etag {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&value.to_be_bytes());
        Etag(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(32);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn parse_hex(hex: &str) -> crate::Result<Etag> {
        if hex.len() != 32 {
            return Err(EngineError::InvalidArgument(format!(
                "an etag must be 32 hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let chunk = std::str::from_utf8(chunk)
                .map_err(|_| EngineError::InvalidArgument("etag is not valid utf8".to_string()))?;
            bytes[i] = u8::from_str_radix(chunk, 16)
                .map_err(|_| EngineError::InvalidArgument(format!("invalid etag hex: {hex:?}")))?;
        }
        Ok(Etag(bytes))
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Etag({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let etag = Etag::from_counter(0xdead_beef);
        let hex = etag.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Etag::parse_hex(&hex).unwrap(), etag);
    }

    #[test]
    fn test_counter_order_matches_byte_order() {
        assert!(Etag::from_counter(1) < Etag::from_counter(2));
        assert!(Etag::from_counter(255) < Etag::from_counter(256));
    }

    #[test]
    fn test_parse_hex_rejects_bad_input() {
        assert!(Etag::parse_hex("00").is_err());
        assert!(Etag::parse_hex(&"zz".repeat(16)).is_err());
    }
}
