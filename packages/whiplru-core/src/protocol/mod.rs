//! The WHIP-LRU wire protocol: message kinds, constants, and streaming codecs.
//!
//! Five message kinds, all multi-byte integers big-endian, all UUIDs on the
//! wire as 32 lowercase hex ASCII characters:
//!
//! - [`AuthChallenge`] (server -> client)
//! - [`AuthResponse`] (client -> server)
//! - [`AuthStatus`] (server -> client)
//! - [`ClientRequest`] (client -> server)
//! - [`ServerResponse`] (server -> client)
//!
//! Codecs are streaming: a decoder accepts successive byte chunks, exposes
//! `is_complete()`, and rejects further input once complete.

mod codec;
mod messages;

pub use codec::{AuthResponseDecoder, ClientRequestDecoder};
pub use messages::{
    AuthChallenge, AuthResponse, AuthStatus, ClientRequest, ProtocolError, RequestType,
    ResponseCode, ServerResponse, CHALLENGE_LEN, MAX_PAYLOAD_BYTES, UUID_HEX_LEN,
};
