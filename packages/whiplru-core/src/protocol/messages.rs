//! Message structs, enums, and framing constants for the wire protocol.

use crate::asset_id::AssetId;

/// Length in bytes of a UUID's compact hex form as it appears on the wire.
pub const UUID_HEX_LEN: usize = 32;

/// Length in bytes of the random authentication challenge.
pub const CHALLENGE_LEN: usize = 7;

/// Maximum payload a [`ClientRequest`] or [`ServerResponse`] may carry.
///
/// 48 MiB minus the 37-byte header: the combined frame size limit is
/// `MAX_PAYLOAD_BYTES + 37 = 50_331_648` bytes.
pub const MAX_PAYLOAD_BYTES: u32 = 50_331_611;

/// Header size of a [`ClientRequest`]/[`ServerResponse`] frame, before payload.
pub(crate) const HEADER_LEN: usize = 1 + UUID_HEX_LEN + 4;

/// Error raised while decoding a wire message.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first byte of a `ClientRequest` did not match any known [`RequestType`].
    #[error("unknown request type byte {0:#04x}")]
    UnknownRequestType(u8),
    /// The first byte of a `ServerResponse` did not match any known [`ResponseCode`].
    #[error("unknown response code byte {0:#04x}")]
    UnknownResponseCode(u8),
    /// A declared payload length exceeded [`MAX_PAYLOAD_BYTES`].
    #[error("declared payload length {declared} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The length the peer declared.
        declared: u32,
        /// The configured maximum.
        max: u32,
    },
    /// The 32-byte UUID field was not valid lowercase hex.
    #[error("uuid field is not valid hex")]
    InvalidUuidHex,
    /// An `AuthResponse`'s hash field was not 40 valid lowercase hex characters.
    #[error("auth response hash is not 40 valid hex characters")]
    InvalidAuthHash,
    /// More bytes were fed to a decoder after it had already completed a message.
    #[error("decoder already produced a complete message")]
    AlreadyComplete,
}

/// Server -> client: the random authentication challenge.
///
/// Wire form, 8 bytes: `0x00` followed by [`CHALLENGE_LEN`] random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The random challenge bytes.
    pub challenge: [u8; CHALLENGE_LEN],
}

impl AuthChallenge {
    /// Encodes this challenge to its 8-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; 1 + CHALLENGE_LEN] {
        let mut out = [0u8; 1 + CHALLENGE_LEN];
        out[0] = 0x00;
        out[1..].copy_from_slice(&self.challenge);
        out
    }
}

/// Client -> server: the hashed response to an [`AuthChallenge`].
///
/// Wire form, 41 bytes: `0x00` followed by 40 ASCII hex characters, the
/// lowercase hex encoding of `SHA-1(password-ASCII || challenge-bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// 40 lowercase ASCII hex characters.
    pub hash_hex: String,
}

impl AuthResponse {
    /// Encodes this response to its 41-byte wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 40);
        out.push(0x00);
        out.extend_from_slice(self.hash_hex.as_bytes());
        out
    }
}

/// Server -> client: the outcome of authentication.
///
/// Wire form, 2 bytes: `0x01` followed by `0x00` (success) or `0x01` (failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Authentication succeeded; the connection may proceed to `Ready`.
    Success,
    /// Authentication failed; the connection must be closed.
    Failure,
}

impl AuthStatus {
    /// Encodes this status to its 2-byte wire form.
    #[must_use]
    pub fn encode(self) -> [u8; 2] {
        match self {
            AuthStatus::Success => [0x01, 0x00],
            AuthStatus::Failure => [0x01, 0x01],
        }
    }
}

/// Request types a [`ClientRequest`]'s first byte may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Fetch an asset, populating local storage from upstream on miss.
    Get = 10,
    /// Store an asset.
    Put = 11,
    /// Purge a single asset by id.
    Purge = 12,
    /// Test whether an asset is present.
    Test = 13,
    /// Purge all locally-flagged assets.
    PurgeLocals = 14,
    /// Request a human-readable status string.
    StatusGet = 15,
    /// Enumerate locally known ids by compact-hex prefix.
    StoredIdsGet = 16,
    /// Fetch an asset without populating local storage from upstream.
    GetDontCache = 17,
}

impl RequestType {
    /// Parses a wire byte into a `RequestType`.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            10 => Ok(RequestType::Get),
            11 => Ok(RequestType::Put),
            12 => Ok(RequestType::Purge),
            13 => Ok(RequestType::Test),
            14 => Ok(RequestType::PurgeLocals),
            15 => Ok(RequestType::StatusGet),
            16 => Ok(RequestType::StoredIdsGet),
            17 => Ok(RequestType::GetDontCache),
            other => Err(ProtocolError::UnknownRequestType(other)),
        }
    }

    /// The wire byte for this request type.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Response codes a [`ServerResponse`]'s first byte may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// The requested asset was found; payload carries its bytes (or is empty
    /// for presence-only responses).
    Found = 10,
    /// The requested asset was not found.
    NotFound = 11,
    /// An error occurred; payload is a UTF-8 diagnostic.
    Error = 12,
    /// The operation succeeded with no asset payload to return.
    Ok = 13,
}

impl ResponseCode {
    /// Parses a wire byte into a `ResponseCode`.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            10 => Ok(ResponseCode::Found),
            11 => Ok(ResponseCode::NotFound),
            12 => Ok(ResponseCode::Error),
            13 => Ok(ResponseCode::Ok),
            other => Err(ProtocolError::UnknownResponseCode(other)),
        }
    }

    /// The wire byte for this response code.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Client -> server request frame.
///
/// Wire form, >= 37 bytes: `type (1)` + `uuid-hex (32)` +
/// `payload-length (4, big-endian)` + `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// The requested operation.
    pub request_type: RequestType,
    /// The asset id (or a prefix, for `STORED_IDS_GET`; zero where unused).
    pub id: AssetId,
    /// The request payload (the asset bytes, for `PUT`).
    pub payload: Vec<u8>,
}

impl ClientRequest {
    /// Encodes this request to its wire form.
    ///
    /// # Panics
    ///
    /// Panics if `payload.len()` exceeds `u32::MAX`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len: u32 = self
            .payload
            .len()
            .try_into()
            .expect("payload length must fit in u32");
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.request_type.to_byte());
        out.extend_from_slice(self.id.to_compact_hex().as_bytes());
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Server -> client response frame.
///
/// Wire form, >= 37 bytes: `code (1)` + `uuid-hex (32)` +
/// `payload-length (4, big-endian)` + `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    /// The response code.
    pub code: ResponseCode,
    /// The asset id this response concerns (zero where not applicable).
    pub id: AssetId,
    /// The response payload (the asset bytes for `RC_FOUND`, a UTF-8
    /// diagnostic for `RC_ERROR`, newline-separated ids for
    /// `STORED_IDS_GET`).
    pub payload: Vec<u8>,
}

impl ServerResponse {
    /// Builds an `RC_FOUND` response carrying the asset's bytes.
    #[must_use]
    pub fn found(id: AssetId, payload: Vec<u8>) -> Self {
        Self {
            code: ResponseCode::Found,
            id,
            payload,
        }
    }

    /// Builds an `RC_NOTFOUND` response.
    #[must_use]
    pub fn not_found(id: AssetId) -> Self {
        Self {
            code: ResponseCode::NotFound,
            id,
            payload: Vec::new(),
        }
    }

    /// Builds an `RC_OK` response.
    #[must_use]
    pub fn ok(id: AssetId) -> Self {
        Self {
            code: ResponseCode::Ok,
            id,
            payload: Vec::new(),
        }
    }

    /// Builds an `RC_OK` response carrying a text payload (status, ids).
    #[must_use]
    pub fn ok_with_text(id: AssetId, text: String) -> Self {
        Self {
            code: ResponseCode::Ok,
            id,
            payload: text.into_bytes(),
        }
    }

    /// Builds an `RC_FOUND` response carrying newline-separated ids.
    #[must_use]
    pub fn found_with_text(id: AssetId, text: String) -> Self {
        Self {
            code: ResponseCode::Found,
            id,
            payload: text.into_bytes(),
        }
    }

    /// Builds an `RC_ERROR` response carrying a UTF-8 diagnostic.
    #[must_use]
    pub fn error(id: AssetId, diagnostic: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Error,
            id,
            payload: diagnostic.into().into_bytes(),
        }
    }

    /// Encodes this response to its wire form.
    ///
    /// # Panics
    ///
    /// Panics if `payload.len()` exceeds `u32::MAX`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len: u32 = self
            .payload
            .len()
            .try_into()
            .expect("payload length must fit in u32");
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.code.to_byte());
        out.extend_from_slice(self.id.to_compact_hex().as_bytes());
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

pub(crate) fn decode_uuid_hex(bytes: &[u8]) -> Result<AssetId, ProtocolError> {
    let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUuidHex)?;
    AssetId::from_compact_hex(s).map_err(|_| ProtocolError::InvalidUuidHex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_challenge_encodes_prefix_byte() {
        let c = AuthChallenge {
            challenge: [1, 2, 3, 4, 5, 6, 7],
        };
        let encoded = c.encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(encoded[0], 0x00);
        assert_eq!(&encoded[1..], &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn auth_status_encodes_literal_bytes() {
        assert_eq!(AuthStatus::Success.encode(), [0x01, 0x00]);
        assert_eq!(AuthStatus::Failure.encode(), [0x01, 0x01]);
    }

    #[test]
    fn request_type_roundtrip() {
        for (byte, rt) in [
            (10, RequestType::Get),
            (11, RequestType::Put),
            (12, RequestType::Purge),
            (13, RequestType::Test),
            (14, RequestType::PurgeLocals),
            (15, RequestType::StatusGet),
            (16, RequestType::StoredIdsGet),
            (17, RequestType::GetDontCache),
        ] {
            assert_eq!(RequestType::from_byte(byte).unwrap(), rt);
            assert_eq!(rt.to_byte(), byte);
        }
    }

    #[test]
    fn request_type_rejects_unknown_byte() {
        assert!(matches!(
            RequestType::from_byte(99),
            Err(ProtocolError::UnknownRequestType(99))
        ));
    }

    #[test]
    fn client_request_encode_matches_scenario_s3() {
        let id = AssetId::from_dashed("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let req = ClientRequest {
            request_type: RequestType::Put,
            id,
            payload: vec![0xFF, 0xFE, 0xFD, 0xFC, 0xFB],
        };
        let encoded = req.encode();
        assert_eq!(encoded[0], RequestType::Put.to_byte());
        assert_eq!(
            &encoded[1..33],
            b"0123456789abcdef0123456789abcdef"
        );
        assert_eq!(&encoded[33..37], &5u32.to_be_bytes());
        assert_eq!(&encoded[37..], &[0xFF, 0xFE, 0xFD, 0xFC, 0xFB]);
    }

    #[test]
    fn server_response_ok_matches_scenario_s3() {
        let id = AssetId::from_dashed("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let resp = ServerResponse::ok(id);
        let encoded = resp.encode();
        assert_eq!(encoded[0], 0x0D);
        assert_eq!(&encoded[1..33], b"0123456789abcdef0123456789abcdef");
        assert_eq!(&encoded[33..37], &[0, 0, 0, 0]);
    }
}
