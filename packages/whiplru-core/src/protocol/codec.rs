//! Streaming decoders: feed successive byte chunks, poll `is_complete()`.

use bytes::BytesMut;

use super::messages::{decode_uuid_hex, ProtocolError, HEADER_LEN, MAX_PAYLOAD_BYTES, UUID_HEX_LEN};
use super::{AuthResponse, ClientRequest, RequestType};

/// Incremental decoder for a single [`AuthResponse`] (fixed 41-byte frame).
#[derive(Debug, Default)]
pub struct AuthResponseDecoder {
    buf: BytesMut,
    done: bool,
}

const AUTH_RESPONSE_LEN: usize = 1 + 40;

impl AuthResponseDecoder {
    /// Creates a fresh decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes read from the socket.
    ///
    /// Returns the number of bytes consumed from `chunk` (the remainder, if
    /// any, belongs to the next frame). Errors once already complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize, ProtocolError> {
        if self.done {
            return Err(ProtocolError::AlreadyComplete);
        }
        let remaining = AUTH_RESPONSE_LEN - self.buf.len();
        let take = remaining.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
        if self.buf.len() == AUTH_RESPONSE_LEN {
            self.done = true;
        }
        Ok(take)
    }

    /// Whether a complete frame has been accumulated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Parses the accumulated bytes into an [`AuthResponse`].
    ///
    /// Must only be called once [`Self::is_complete`] is `true`.
    pub fn finish(&self) -> Result<AuthResponse, ProtocolError> {
        debug_assert!(self.done);
        let hash_bytes = &self.buf[1..];
        let hash_hex =
            std::str::from_utf8(hash_bytes).map_err(|_| ProtocolError::InvalidAuthHash)?;
        if hash_hex.len() != 40 || !hash_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidAuthHash);
        }
        Ok(AuthResponse {
            hash_hex: hash_hex.to_ascii_lowercase(),
        })
    }
}

/// Incremental decoder for a single [`ClientRequest`] (variable-length frame).
#[derive(Debug, Default)]
pub struct ClientRequestDecoder {
    buf: BytesMut,
    header_len: Option<u32>,
    done: bool,
}

impl ClientRequestDecoder {
    /// Creates a fresh decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes read from the socket.
    ///
    /// Returns the number of bytes consumed from `chunk`. A declared payload
    /// length exceeding [`MAX_PAYLOAD_BYTES`] is rejected immediately, as
    /// soon as the 37-byte header is available, without waiting for the
    /// (oversized) payload to arrive.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize, ProtocolError> {
        if self.done {
            return Err(ProtocolError::AlreadyComplete);
        }
        let mut consumed = 0;

        if self.buf.len() < HEADER_LEN {
            let need = HEADER_LEN - self.buf.len();
            let take = need.min(chunk.len());
            self.buf.extend_from_slice(&chunk[..take]);
            consumed += take;
            if self.buf.len() < HEADER_LEN {
                return Ok(consumed);
            }
            let payload_len = self.declared_payload_len();
            if payload_len > MAX_PAYLOAD_BYTES {
                return Err(ProtocolError::PayloadTooLarge {
                    declared: payload_len,
                    max: MAX_PAYLOAD_BYTES,
                });
            }
            self.header_len = Some(payload_len);
        }

        let total = HEADER_LEN + self.header_len.unwrap_or(0) as usize;
        let remaining = total - self.buf.len();
        let take = remaining.min(chunk.len() - consumed);
        self.buf.extend_from_slice(&chunk[consumed..consumed + take]);
        consumed += take;

        if self.buf.len() == total {
            self.done = true;
        }
        Ok(consumed)
    }

    /// The payload length declared in the header. Sign bit is never set: the
    /// field is a plain big-endian `u32`, so negative lengths cannot occur.
    fn declared_payload_len(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[1 + UUID_HEX_LEN..1 + UUID_HEX_LEN + 4]);
        u32::from_be_bytes(raw)
    }

    /// Whether a complete frame has been accumulated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Best-effort asset id recovered from whatever header bytes have
    /// arrived so far, for attaching to an `RC_ERROR` response when decoding
    /// fails before a full frame exists. [`AssetId::ZERO`](crate::AssetId::ZERO)
    /// if the uuid field hasn't arrived yet or isn't valid hex.
    #[must_use]
    pub fn partial_id(&self) -> crate::AssetId {
        if self.buf.len() >= 1 + UUID_HEX_LEN {
            decode_uuid_hex(&self.buf[1..1 + UUID_HEX_LEN]).unwrap_or(crate::AssetId::ZERO)
        } else {
            crate::AssetId::ZERO
        }
    }

    /// Parses the accumulated bytes into a [`ClientRequest`].
    ///
    /// Must only be called once [`Self::is_complete`] is `true`.
    pub fn finish(&self) -> Result<ClientRequest, ProtocolError> {
        debug_assert!(self.done);
        let request_type = RequestType::from_byte(self.buf[0])?;
        let id = decode_uuid_hex(&self.buf[1..1 + UUID_HEX_LEN])?;
        let payload = self.buf[HEADER_LEN..].to_vec();
        Ok(ClientRequest {
            request_type,
            id,
            payload,
        })
    }
}
