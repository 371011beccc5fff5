//! Plaintext framing over a raw byte stream.
//!
//! ```text
//! ┌──────────┬──────────────────┬───────────────────┬──────────────────┐
//! │ 0x00     │ varint(len)      │ varint(type)      │ payload[len]     │
//! └──────────┴──────────────────┴───────────────────┴──────────────────┘
//! ```
//!
//! `len` counts payload bytes only; the message-type varint sits between
//! the length and the payload and is not included in it. A marker of
//! `0x01` announces an encrypted frame, which this client does not speak.
//!
//! TCP delivers a stream, not messages, so one read can hold several
//! frames or end halfway through one. [`FrameDecoder`] keeps the leftover
//! tail until the rest arrives.

use crate::ProtocolError;
use crate::varint::{encode_varint, peek_varint, size_of_varint};

/// Marker byte for a plaintext frame.
pub const PLAINTEXT_MARKER: u8 = 0x00;

/// Marker byte for an encrypted (noise) frame.
pub const ENCRYPTED_MARKER: u8 = 0x01;

/// Largest payload the decoder will wait for. A length beyond this is
/// treated as a corrupt header rather than buffered.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// One complete frame pulled off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The numeric message type, not yet checked against the catalogue.
    pub message_type: u32,
    /// The encoded message body. May be empty.
    pub payload: Vec<u8>,
}

/// Builds a plaintext frame around an already encoded payload.
pub fn encode_frame(message_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + size_of_varint(payload.len() as u64)
            + size_of_varint(u64::from(message_type))
            + payload.len(),
    );
    out.push(PLAINTEXT_MARKER);
    encode_varint(payload.len() as u64, &mut out);
    encode_varint(u64::from(message_type), &mut out);
    out.extend_from_slice(payload);
    out
}

/// Incremental frame decoder.
///
/// Feed it bytes with [`push`](Self::push) as they arrive, then call
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pops the next complete frame.
    ///
    /// Returns `Ok(None)` when the buffer is empty or holds only part of a
    /// frame; the partial bytes stay put.
    ///
    /// # Errors
    /// - [`ProtocolError::EncryptionUnsupported`]: marker `0x01`. Nothing
    ///   is consumed; the session cannot continue.
    /// - [`ProtocolError::InvalidMarker`]: any other unexpected marker.
    ///   The rest of the buffer is discarded, since there is no way to
    ///   find the next frame boundary.
    /// - [`ProtocolError::OversizedFrame`]: the length header exceeds
    ///   [`MAX_PAYLOAD_LEN`]. The buffer is discarded for the same reason.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let Some(&marker) = self.buf.first() else {
            return Ok(None);
        };

        match marker {
            PLAINTEXT_MARKER => {}
            ENCRYPTED_MARKER => {
                return Err(ProtocolError::EncryptionUnsupported);
            }
            other => {
                tracing::warn!(
                    marker = other,
                    discarded = self.buf.len(),
                    "invalid frame marker, discarding receive buffer"
                );
                self.buf.clear();
                return Err(ProtocolError::InvalidMarker(other));
            }
        }

        let Some((length, length_width)) = peek_varint(&self.buf[1..]) else {
            return Ok(None);
        };
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length > MAX_PAYLOAD_LEN {
            tracing::warn!(
                length,
                max = MAX_PAYLOAD_LEN,
                "frame length too large, discarding receive buffer"
            );
            self.buf.clear();
            return Err(ProtocolError::OversizedFrame(length));
        }

        let type_start = 1 + length_width;
        let Some((message_type, type_width)) =
            peek_varint(&self.buf[type_start..])
        else {
            return Ok(None);
        };

        let header = type_start + type_width;
        let end = header + length;
        if self.buf.len() < end {
            return Ok(None);
        }

        let payload = self.buf[header..end].to_vec();
        self.buf.drain(..end);

        Ok(Some(Frame {
            message_type: u32::try_from(message_type).unwrap_or(u32::MAX),
            payload,
        }))
    }
}
