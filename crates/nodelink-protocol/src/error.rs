//! Error types for the protocol layer.
//!
//! Each crate in nodelink defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong (or asked for something
//! this client cannot do), never that the socket or session misbehaved.

use crate::fields::WireType;

/// Errors that can occur while framing, decoding or encoding messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A field tag carried a wire type outside {0, 1, 2, 5}.
    ///
    /// The decoder cannot know how long such a field is, so nothing after
    /// it in the same message can be trusted. Decoding stops here.
    #[error("unknown wire type {wire_type} on field {field}")]
    UnknownWireType { field: u32, wire_type: u8 },

    /// A fixed-width field ran past the end of its message.
    #[error("field {field} truncated: needed {needed} bytes, {available} available")]
    Truncated {
        field: u32,
        needed: usize,
        available: usize,
    },

    /// A field was present but encoded with a different wire type than
    /// the message layout says it should have.
    #[error("field {field}: expected {expected}, found {found}")]
    FieldType {
        field: u32,
        expected: WireType,
        found: WireType,
    },

    /// A frame began with a marker byte other than plaintext or encrypted.
    #[error("invalid frame marker 0x{0:02x}")]
    InvalidMarker(u8),

    /// A frame header declared a payload larger than the decoder accepts.
    #[error("frame payload of {0} bytes exceeds limit")]
    OversizedFrame(usize),

    /// The peer sent an encrypted frame. Only plaintext is supported.
    #[error("encrypted transport requested; only plaintext frames are supported")]
    EncryptionUnsupported,

    /// A message type outside 1–65 (or one this client does not decode).
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u32),
}
