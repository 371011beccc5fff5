//! Session layer for nodelink: one device connection's protocol state.
//!
//! This crate owns everything between "bytes arrived" and "something
//! happened on the device":
//!
//! 1. **Dispatch**: frames are decoded and routed by message type
//!    ([`Session::receive`]).
//! 2. **Connection state machine**: the ordered handshake, keepalive
//!    pings and teardown ([`ConnectionState`], [`TimerKind`]).
//! 3. **Entity registry**: descriptors collected during listing
//!    ([`EntityRegistry`]).
//!
//! The session is sans-IO: it returns [`Action`]s for its owner to carry
//! out instead of writing to a socket or sleeping.
//!
//! # How it fits in the stack
//!
//! ```text
//! Client facade (above)  ← drives the session from one task
//!     ↕
//! Session Layer (this crate)  ← handshake, keepalive, registry
//!     ↕
//! Protocol Layer (below)  ← frames, tag maps, typed messages
//! ```

mod config;
mod error;
mod registry;
mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use registry::EntityRegistry;
pub use session::{
    Action, ConnectionState, DisconnectReason, MAX_CAMERA_IMAGE_LEN, Session, SessionEvent,
    TimerKind,
};
