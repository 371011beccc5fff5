//! Error types for the session layer.

use nodelink_protocol::ProtocolError;

use crate::ConnectionState;

/// Errors that end a session or reject a request made to it.
///
/// Everything except [`InvalidState`](Self::InvalidState) and
/// [`NotConnected`](Self::NotConnected) is fatal: the session routes it
/// through teardown and reports it as the disconnect reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The byte stream itself was unusable (e.g. the node asked for
    /// encryption).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The node speaks an API major version other than 1.
    #[error("unsupported API version {major}.{minor}")]
    UnsupportedApiVersion { major: u32, minor: u32 },

    /// The node rejected the configured password.
    #[error("node rejected the password")]
    InvalidPassword,

    /// A keepalive ping went unanswered for the configured timeout.
    #[error("no ping response within {0:?}")]
    PingTimeout(std::time::Duration),

    /// An operation was attempted in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// A command was issued before the handshake completed.
    #[error("session is not connected")]
    NotConnected,
}
