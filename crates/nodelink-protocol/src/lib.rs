//! Wire protocol for nodelink.
//!
//! This crate defines the bytes a node and its client exchange:
//!
//! - **Varints** ([`varint`]): base-128 integers and the zigzag mapping.
//! - **Tag maps** ([`TagMap`], [`FieldValue`]): a schema-less view of one
//!   message body, keyed by field number.
//! - **Frames** ([`encode_frame`], [`FrameDecoder`]): the plaintext
//!   envelope around each message on the stream.
//! - **Messages** ([`MessageType`], [`Inbound`], [`Outbound`]): typed
//!   records built from and into tag maps.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (handshake and entity state). It knows nothing about sockets or
//! timers; every function here is pure.
//!
//! ```text
//! Transport (bytes) → FrameDecoder (Frame) → TagMap → Inbound → Session
//! ```

pub mod varint;

mod command;
mod entity;
mod error;
mod fields;
mod frame;
mod message;
mod state;

pub use command::{
    Command, CoverCommand, FanCommand, LightCommand, LockAction, LockCommand,
    MediaPlayerAction, MediaPlayerCommand, SirenCommand,
};
pub use entity::{EntityCategory, EntityInfo, EntityKey, EntityKind, PlatformInfo};
pub use error::ProtocolError;
pub use fields::{FieldValue, TagMap, WireType};
pub use frame::{
    ENCRYPTED_MARKER, Frame, FrameDecoder, MAX_PAYLOAD_LEN, PLAINTEXT_MARKER,
    encode_frame,
};
pub use message::{
    API_VERSION_MAJOR, API_VERSION_MINOR, CameraImageChunk, CameraImageRequest,
    ConnectResponse, DeviceInfo, HelloRequest, HelloResponse, Inbound, LogEntry,
    LogLevel, MESSAGE_TYPE_RANGE, MessageType, Outbound, SubscribeLogsRequest,
};
pub use state::{CoverOperation, EntityState, FanDirection, LockState, MediaPlayerState};
