//! # nodelink
//!
//! Async client for networked home-automation nodes speaking the
//! plaintext native API.
//!
//! nodelink connects to a node over TCP, performs the hello/connect
//! handshake, lists the node's entities, subscribes to state updates and
//! logs, keeps the link alive with pings, and lets you send commands back.
//! Everything the node reports arrives as a [`SessionEvent`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nodelink::prelude::*;
//!
//! # async fn run() -> Result<(), NodelinkError> {
//! let (client, mut events) = Client::builder()
//!     .address("192.168.1.40:6053")
//!     .connect()
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::EntitiesListed { entities } = &event {
//!         println!("{} entities", entities.len());
//!         client.disconnect().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod driver;
mod error;

pub use client::{Client, ClientBuilder, ClientHandle, EventReceiver};
pub use error::NodelinkError;

pub use nodelink_protocol as protocol;
pub use nodelink_session as session;

pub use nodelink_protocol::{
    Command, CoverCommand, DeviceInfo, EntityInfo, EntityKey, EntityKind, EntityState,
    FanCommand, LightCommand, LockAction, LockCommand, LogEntry, LogLevel,
    MediaPlayerAction, MediaPlayerCommand, SirenCommand,
};
pub use nodelink_session::{ConnectionState, DisconnectReason, SessionConfig, SessionEvent};

/// Common imports for nodelink users.
///
/// ```rust
/// use nodelink::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, ClientHandle, Command, ConnectionState, DisconnectReason, EntityInfo, EntityKey,
        EntityState, EventReceiver, NodelinkError, SessionConfig, SessionEvent,
    };
}
