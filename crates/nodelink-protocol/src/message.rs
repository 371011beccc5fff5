//! The message catalogue and the records carried by each message.
//!
//! Numbering follows the node firmware's schema. Only the types this
//! client sends or understands are listed; anything else in
//! [`MESSAGE_TYPE_RANGE`] is recognised as "valid but unimplemented" and
//! skipped by the session.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::frame::encode_frame;
use crate::{EntityInfo, EntityKey, EntityKind, EntityState, ProtocolError, TagMap};

/// Message type numbers a node may legitimately send.
pub const MESSAGE_TYPE_RANGE: RangeInclusive<u32> = 1..=65;

/// API version this client announces in its hello.
pub const API_VERSION_MAJOR: u32 = 1;
pub const API_VERSION_MINOR: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    HelloRequest = 1,
    HelloResponse = 2,
    ConnectRequest = 3,
    ConnectResponse = 4,
    DisconnectRequest = 5,
    DisconnectResponse = 6,
    PingRequest = 7,
    PingResponse = 8,
    DeviceInfoRequest = 9,
    DeviceInfoResponse = 10,
    ListEntitiesRequest = 11,
    ListEntitiesBinarySensorResponse = 12,
    ListEntitiesCoverResponse = 13,
    ListEntitiesFanResponse = 14,
    ListEntitiesLightResponse = 15,
    ListEntitiesSensorResponse = 16,
    ListEntitiesSwitchResponse = 17,
    ListEntitiesTextSensorResponse = 18,
    ListEntitiesDoneResponse = 19,
    SubscribeStatesRequest = 20,
    BinarySensorStateResponse = 21,
    CoverStateResponse = 22,
    FanStateResponse = 23,
    LightStateResponse = 24,
    SensorStateResponse = 25,
    SwitchStateResponse = 26,
    TextSensorStateResponse = 27,
    SubscribeLogsRequest = 28,
    SubscribeLogsResponse = 29,
    CoverCommandRequest = 30,
    FanCommandRequest = 31,
    LightCommandRequest = 32,
    SwitchCommandRequest = 33,
    GetTimeRequest = 36,
    GetTimeResponse = 37,
    ListEntitiesCameraResponse = 43,
    CameraImageResponse = 44,
    CameraImageRequest = 45,
    ListEntitiesNumberResponse = 49,
    NumberStateResponse = 50,
    NumberCommandRequest = 51,
    ListEntitiesSirenResponse = 55,
    SirenStateResponse = 56,
    SirenCommandRequest = 57,
    ListEntitiesLockResponse = 58,
    LockStateResponse = 59,
    LockCommandRequest = 60,
    ListEntitiesButtonResponse = 61,
    ButtonCommandRequest = 62,
    ListEntitiesMediaPlayerResponse = 63,
    MediaPlayerStateResponse = 64,
    MediaPlayerCommandRequest = 65,
}

impl MessageType {
    /// Maps a wire number to a known message type.
    ///
    /// Returns `None` both for numbers outside [`MESSAGE_TYPE_RANGE`] and
    /// for in-range numbers this client has no decoder for.
    pub fn from_u32(value: u32) -> Option<Self> {
        use MessageType::*;
        let message_type = match value {
            1 => HelloRequest,
            2 => HelloResponse,
            3 => ConnectRequest,
            4 => ConnectResponse,
            5 => DisconnectRequest,
            6 => DisconnectResponse,
            7 => PingRequest,
            8 => PingResponse,
            9 => DeviceInfoRequest,
            10 => DeviceInfoResponse,
            11 => ListEntitiesRequest,
            12 => ListEntitiesBinarySensorResponse,
            13 => ListEntitiesCoverResponse,
            14 => ListEntitiesFanResponse,
            15 => ListEntitiesLightResponse,
            16 => ListEntitiesSensorResponse,
            17 => ListEntitiesSwitchResponse,
            18 => ListEntitiesTextSensorResponse,
            19 => ListEntitiesDoneResponse,
            20 => SubscribeStatesRequest,
            21 => BinarySensorStateResponse,
            22 => CoverStateResponse,
            23 => FanStateResponse,
            24 => LightStateResponse,
            25 => SensorStateResponse,
            26 => SwitchStateResponse,
            27 => TextSensorStateResponse,
            28 => SubscribeLogsRequest,
            29 => SubscribeLogsResponse,
            30 => CoverCommandRequest,
            31 => FanCommandRequest,
            32 => LightCommandRequest,
            33 => SwitchCommandRequest,
            36 => GetTimeRequest,
            37 => GetTimeResponse,
            43 => ListEntitiesCameraResponse,
            44 => CameraImageResponse,
            45 => CameraImageRequest,
            49 => ListEntitiesNumberResponse,
            50 => NumberStateResponse,
            51 => NumberCommandRequest,
            55 => ListEntitiesSirenResponse,
            56 => SirenStateResponse,
            57 => SirenCommandRequest,
            58 => ListEntitiesLockResponse,
            59 => LockStateResponse,
            60 => LockCommandRequest,
            61 => ListEntitiesButtonResponse,
            62 => ButtonCommandRequest,
            63 => ListEntitiesMediaPlayerResponse,
            64 => MediaPlayerStateResponse,
            65 => MediaPlayerCommandRequest,
            _ => return None,
        };
        Some(message_type)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.as_u32())
    }
}

// ---------------------------------------------------------------------------
// Handshake records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRequest {
    pub client_info: String,
    pub api_version_major: u32,
    pub api_version_minor: u32,
}

impl HelloRequest {
    pub fn new(client_info: impl Into<String>) -> Self {
        Self {
            client_info: client_info.into(),
            api_version_major: API_VERSION_MAJOR,
            api_version_minor: API_VERSION_MINOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HelloResponse {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub server_info: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectResponse {
    pub invalid_password: bool,
}

/// Static facts about the node, reported once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceInfo {
    pub uses_password: bool,
    pub name: String,
    pub mac_address: String,
    pub esphome_version: String,
    pub compilation_time: String,
    pub model: String,
    pub has_deep_sleep: bool,
    pub project_name: String,
    pub project_version: String,
    pub webserver_port: u32,
    pub manufacturer: String,
    pub friendly_name: String,
    pub suggested_area: String,
}

impl DeviceInfo {
    fn decode(f: &TagMap) -> Result<Self, ProtocolError> {
        Ok(Self {
            uses_password: f.boolean(1)?,
            name: f.string(2)?,
            mac_address: f.string(3)?,
            esphome_version: f.string(4)?,
            compilation_time: f.string(5)?,
            model: f.string(6)?,
            has_deep_sleep: f.boolean(7)?,
            project_name: f.string(8)?,
            project_version: f.string(9)?,
            webserver_port: f.uint32(10)?,
            manufacturer: f.string(12)?,
            friendly_name: f.string(13)?,
            suggested_area: f.string(16)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Logs, time, camera
// ---------------------------------------------------------------------------

/// Severity of a node log line, also used as the subscription threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    Error,
    Warn,
    #[default]
    Info,
    Config,
    Debug,
    Verbose,
    VeryVerbose,
}

impl LogLevel {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Config,
            5 => Self::Debug,
            6 => Self::Verbose,
            _ => Self::VeryVerbose,
        }
    }

    pub fn to_wire(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeLogsRequest {
    pub level: LogLevel,
    pub dump_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub send_failed: bool,
}

/// One slice of a camera image. The last slice has `done` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraImageChunk {
    pub key: EntityKey,
    pub data: Vec<u8>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraImageRequest {
    pub single: bool,
    pub stream: bool,
}

// ---------------------------------------------------------------------------
// Direction-specific unions
// ---------------------------------------------------------------------------

/// A decoded message received from a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HelloResponse(HelloResponse),
    ConnectResponse(ConnectResponse),
    DisconnectRequest,
    DisconnectResponse,
    PingRequest,
    PingResponse,
    DeviceInfo(DeviceInfo),
    EntityListed(EntityInfo),
    ListEntitiesDone,
    State(EntityState),
    Log(LogEntry),
    GetTimeRequest,
    CameraImage(CameraImageChunk),
}

impl Inbound {
    /// Interprets a decoded tag map according to its message type.
    ///
    /// Returns `Ok(None)` for types that only ever travel client to node;
    /// a node sending one of those is ignored rather than faulted.
    pub fn decode(
        message_type: MessageType,
        f: &TagMap,
    ) -> Result<Option<Self>, ProtocolError> {
        use MessageType as M;

        if let Some(kind) = EntityKind::from_listing_type(message_type) {
            return Ok(Some(Self::EntityListed(EntityInfo::decode(kind, f)?)));
        }
        if let Some(state) = EntityState::decode(message_type, f)? {
            return Ok(Some(Self::State(state)));
        }

        let inbound = match message_type {
            M::HelloResponse => Self::HelloResponse(HelloResponse {
                api_version_major: f.uint32(1)?,
                api_version_minor: f.uint32(2)?,
                server_info: f.string(3)?,
                name: f.string(4)?,
            }),
            M::ConnectResponse => Self::ConnectResponse(ConnectResponse {
                invalid_password: f.boolean(1)?,
            }),
            M::DisconnectRequest => Self::DisconnectRequest,
            M::DisconnectResponse => Self::DisconnectResponse,
            M::PingRequest => Self::PingRequest,
            M::PingResponse => Self::PingResponse,
            M::DeviceInfoResponse => Self::DeviceInfo(DeviceInfo::decode(f)?),
            M::ListEntitiesDoneResponse => Self::ListEntitiesDone,
            M::SubscribeLogsResponse => Self::Log(LogEntry {
                level: LogLevel::from_wire(f.uint32(1)?),
                message: f.string(3)?,
                send_failed: f.boolean(4)?,
            }),
            M::GetTimeRequest => Self::GetTimeRequest,
            M::CameraImageResponse => Self::CameraImage(CameraImageChunk {
                key: EntityKey(f.fixed32(1)?),
                data: f.bytes(2)?.to_vec(),
                done: f.boolean(3)?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(inbound))
    }
}

/// A message this client sends to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Hello(HelloRequest),
    Connect { password: String },
    DisconnectRequest,
    DisconnectResponse,
    PingRequest,
    PingResponse,
    DeviceInfoRequest,
    ListEntitiesRequest,
    SubscribeStates,
    SubscribeLogs(SubscribeLogsRequest),
    /// Seconds since the Unix epoch.
    GetTimeResponse { epoch_seconds: u32 },
    CameraImageRequest(CameraImageRequest),
    Command(Command),
}

impl Outbound {
    pub fn message_type(&self) -> MessageType {
        use MessageType as M;
        match self {
            Self::Hello(_) => M::HelloRequest,
            Self::Connect { .. } => M::ConnectRequest,
            Self::DisconnectRequest => M::DisconnectRequest,
            Self::DisconnectResponse => M::DisconnectResponse,
            Self::PingRequest => M::PingRequest,
            Self::PingResponse => M::PingResponse,
            Self::DeviceInfoRequest => M::DeviceInfoRequest,
            Self::ListEntitiesRequest => M::ListEntitiesRequest,
            Self::SubscribeStates => M::SubscribeStatesRequest,
            Self::SubscribeLogs(_) => M::SubscribeLogsRequest,
            Self::GetTimeResponse { .. } => M::GetTimeResponse,
            Self::CameraImageRequest(_) => M::CameraImageRequest,
            Self::Command(command) => command.message_type(),
        }
    }

    pub fn to_fields(&self) -> TagMap {
        match self {
            Self::Hello(hello) => TagMap::new()
                .with_string(1, &hello.client_info)
                .with_uint(2, u64::from(hello.api_version_major))
                .with_uint(3, u64::from(hello.api_version_minor)),
            Self::Connect { password } => TagMap::new().with_string(1, password),
            Self::SubscribeLogs(req) => TagMap::new()
                .with_uint(1, req.level.to_wire())
                .with_bool(2, req.dump_config),
            Self::GetTimeResponse { epoch_seconds } => {
                TagMap::new().with_fixed32(1, *epoch_seconds)
            }
            Self::CameraImageRequest(req) => TagMap::new()
                .with_bool(1, req.single)
                .with_bool(2, req.stream),
            Self::Command(command) => command.to_fields(),
            Self::DisconnectRequest
            | Self::DisconnectResponse
            | Self::PingRequest
            | Self::PingResponse
            | Self::DeviceInfoRequest
            | Self::ListEntitiesRequest
            | Self::SubscribeStates => TagMap::new(),
        }
    }

    /// Encodes the message as a complete plaintext frame.
    pub fn to_frame(&self) -> Vec<u8> {
        encode_frame(self.message_type().as_u32(), &self.to_fields().encode())
    }
}
