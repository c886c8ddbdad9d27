//! WHIP-LRU core -- asset identifiers and the wire protocol codecs.
//!
//! This crate has no I/O and no storage logic. It provides the vocabulary
//! shared between the server and anything speaking its wire protocol:
//!
//! - [`asset_id`]: the 128-bit [`AssetId`](asset_id::AssetId) and its two
//!   textual forms.
//! - [`protocol`]: the five message kinds, streaming decoders, and the
//!   protocol-level error type.

pub mod asset_id;
pub mod protocol;

pub use asset_id::{AssetId, AssetIdParseError};
pub use protocol::{
    AuthChallenge, AuthResponse, AuthResponseDecoder, AuthStatus, ClientRequest,
    ClientRequestDecoder, ProtocolError, RequestType, ResponseCode, ServerResponse,
    CHALLENGE_LEN, MAX_PAYLOAD_BYTES, UUID_HEX_LEN,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
