//! Unified error type for nodelink.

use nodelink_session::SessionError;
use nodelink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `nodelink` crate, you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant generates `From` impls, so `?` converts layer errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum NodelinkError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A session-level error (handshake, state, command rejected).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// `connect` was called without an address.
    #[error("no node address configured")]
    MissingAddress,

    /// The connection's driver task has stopped; the handle is dead.
    #[error("client is closed")]
    Closed,
}
