//! The 128-bit asset identifier and its two textual forms.

use std::fmt;

use uuid::Uuid;

/// Identifies an asset: a 128-bit value, normally a UUID.
///
/// Two textual forms appear on the wire and in logs: the 32-hex-character
/// "compact" form (used on the wire) and the 8-4-4-4-12 dashed form (used in
/// logs and diagnostics). The all-zero identifier is reserved and invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub [u8; 16]);

impl AssetId {
    /// The reserved, invalid all-zero identifier.
    pub const ZERO: AssetId = AssetId([0u8; 16]);

    /// Generates a new random asset id. Never returns [`AssetId::ZERO`].
    #[must_use]
    pub fn new_random() -> Self {
        loop {
            let id = AssetId(*Uuid::new_v4().as_bytes());
            if !id.is_zero() {
                return id;
            }
        }
    }

    /// Whether this is the reserved, invalid identifier.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Parses the 32-character lowercase-or-uppercase hex "compact" form.
    pub fn from_compact_hex(s: &str) -> Result<Self, AssetIdParseError> {
        if s.len() != 32 {
            return Err(AssetIdParseError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| AssetIdParseError::NotHex)?;
        Ok(AssetId(bytes))
    }

    /// Parses the 8-4-4-4-12 dashed form.
    pub fn from_dashed(s: &str) -> Result<Self, AssetIdParseError> {
        let uuid = Uuid::parse_str(s).map_err(|_| AssetIdParseError::NotHex)?;
        Ok(AssetId(*uuid.as_bytes()))
    }

    /// Renders the 32-character lowercase "compact" form used on the wire.
    #[must_use]
    pub fn to_compact_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Renders the 8-4-4-4-12 dashed form used in logs.
    #[must_use]
    pub fn to_dashed(&self) -> String {
        Uuid::from_bytes(self.0).hyphenated().to_string()
    }

    /// Returns the raw 16 bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dashed())
    }
}

/// Error parsing an [`AssetId`] from text.
#[derive(Debug, thiserror::Error)]
pub enum AssetIdParseError {
    /// The compact form was not exactly 32 characters.
    #[error("asset id must be 32 hex characters, got {0}")]
    WrongLength(usize),
    /// The input was not valid hex / UUID text.
    #[error("asset id is not valid hex")]
    NotHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero() {
        assert!(AssetId::ZERO.is_zero());
        assert!(!AssetId::new_random().is_zero());
    }

    #[test]
    fn compact_hex_roundtrip() {
        let id = AssetId::new_random();
        let hex = id.to_compact_hex();
        assert_eq!(hex.len(), 32);
        let parsed = AssetId::from_compact_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn dashed_roundtrip() {
        let id = AssetId::new_random();
        let dashed = id.to_dashed();
        assert_eq!(dashed.len(), 36);
        let parsed = AssetId::from_dashed(&dashed).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn compact_hex_rejects_wrong_length() {
        assert!(matches!(
            AssetId::from_compact_hex("abc"),
            Err(AssetIdParseError::WrongLength(3))
        ));
    }

    #[test]
    fn compact_hex_rejects_non_hex() {
        let not_hex = "z".repeat(32);
        assert!(matches!(
            AssetId::from_compact_hex(&not_hex),
            Err(AssetIdParseError::NotHex)
        ));
    }

    #[test]
    fn literal_id_matches_scenario_s3() {
        let id = AssetId::from_dashed("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        assert_eq!(id.to_compact_hex(), "0123456789abcdef0123456789abcdef");
    }
}
