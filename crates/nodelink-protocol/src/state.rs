//! Entity state reports, streamed after `SubscribeStatesRequest`.
//!
//! Every state response starts with the entity's `fixed32` key in field 1.
//! What follows depends on the platform.

use serde::Serialize;

use crate::{EntityKey, EntityKind, MessageType, ProtocolError, TagMap};

/// Motion of a cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverOperation {
    #[default]
    Idle,
    Opening,
    Closing,
}

impl CoverOperation {
    fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Closing,
            _ => Self::Idle,
        }
    }
}

/// Rotation direction of a fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanDirection {
    #[default]
    Forward,
    Reverse,
}

impl FanDirection {
    fn from_wire(value: u32) -> Self {
        if value == 1 { Self::Reverse } else { Self::Forward }
    }

    pub(crate) fn to_wire(self) -> u64 {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

/// Reported position of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    #[default]
    None,
    Locked,
    Unlocked,
    Jammed,
    Locking,
    Unlocking,
}

impl LockState {
    fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Locked,
            2 => Self::Unlocked,
            3 => Self::Jammed,
            4 => Self::Locking,
            5 => Self::Unlocking,
            _ => Self::None,
        }
    }
}

/// Playback state of a media player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPlayerState {
    #[default]
    None,
    Idle,
    Playing,
    Paused,
}

impl MediaPlayerState {
    fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Playing,
            3 => Self::Paused,
            _ => Self::None,
        }
    }
}

/// One decoded state report.
///
/// `missing_state` means the node has no value yet (e.g. a sensor that
/// has not produced its first reading); the accompanying state field is
/// then meaningless.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum EntityState {
    BinarySensor {
        key: EntityKey,
        state: bool,
        missing_state: bool,
    },
    Cover {
        key: EntityKey,
        position: f32,
        tilt: f32,
        current_operation: CoverOperation,
    },
    Fan {
        key: EntityKey,
        state: bool,
        oscillating: bool,
        direction: FanDirection,
        speed_level: i32,
        preset_mode: String,
    },
    Light {
        key: EntityKey,
        state: bool,
        brightness: f32,
        color_mode: u32,
        color_brightness: f32,
        red: f32,
        green: f32,
        blue: f32,
        white: f32,
        color_temperature: f32,
        cold_white: f32,
        warm_white: f32,
        effect: String,
    },
    Sensor {
        key: EntityKey,
        state: f32,
        missing_state: bool,
    },
    Switch {
        key: EntityKey,
        state: bool,
    },
    TextSensor {
        key: EntityKey,
        state: String,
        missing_state: bool,
    },
    Number {
        key: EntityKey,
        state: f32,
        missing_state: bool,
    },
    Siren {
        key: EntityKey,
        state: bool,
    },
    Lock {
        key: EntityKey,
        state: LockState,
    },
    MediaPlayer {
        key: EntityKey,
        state: MediaPlayerState,
        volume: f32,
        muted: bool,
    },
}

impl EntityState {
    /// The key of the entity this report is about.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::BinarySensor { key, .. }
            | Self::Cover { key, .. }
            | Self::Fan { key, .. }
            | Self::Light { key, .. }
            | Self::Sensor { key, .. }
            | Self::Switch { key, .. }
            | Self::TextSensor { key, .. }
            | Self::Number { key, .. }
            | Self::Siren { key, .. }
            | Self::Lock { key, .. }
            | Self::MediaPlayer { key, .. } => *key,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::BinarySensor { .. } => EntityKind::BinarySensor,
            Self::Cover { .. } => EntityKind::Cover,
            Self::Fan { .. } => EntityKind::Fan,
            Self::Light { .. } => EntityKind::Light,
            Self::Sensor { .. } => EntityKind::Sensor,
            Self::Switch { .. } => EntityKind::Switch,
            Self::TextSensor { .. } => EntityKind::TextSensor,
            Self::Number { .. } => EntityKind::Number,
            Self::Siren { .. } => EntityKind::Siren,
            Self::Lock { .. } => EntityKind::Lock,
            Self::MediaPlayer { .. } => EntityKind::MediaPlayer,
        }
    }

    /// Decodes a state response. Returns `Ok(None)` for message types that
    /// are not state reports.
    pub fn decode(
        message_type: MessageType,
        f: &TagMap,
    ) -> Result<Option<Self>, ProtocolError> {
        use MessageType as M;

        // Only state reports carry the key in field 1 as fixed32; other
        // messages use field 1 for varints.
        let key = || f.fixed32(1).map(EntityKey);
        let state = match message_type {
            M::BinarySensorStateResponse => Self::BinarySensor {
                key: key()?,
                state: f.boolean(2)?,
                missing_state: f.boolean(3)?,
            },
            M::CoverStateResponse => Self::Cover {
                key: key()?,
                position: f.float(3)?,
                tilt: f.float(4)?,
                current_operation: CoverOperation::from_wire(f.uint32(5)?),
            },
            M::FanStateResponse => Self::Fan {
                key: key()?,
                state: f.boolean(2)?,
                oscillating: f.boolean(3)?,
                direction: FanDirection::from_wire(f.uint32(5)?),
                speed_level: f.int32(6)?,
                preset_mode: f.string(7)?,
            },
            M::LightStateResponse => Self::Light {
                key: key()?,
                state: f.boolean(2)?,
                brightness: f.float(3)?,
                color_mode: f.uint32(11)?,
                color_brightness: f.float(10)?,
                red: f.float(4)?,
                green: f.float(5)?,
                blue: f.float(6)?,
                white: f.float(7)?,
                color_temperature: f.float(8)?,
                cold_white: f.float(12)?,
                warm_white: f.float(13)?,
                effect: f.string(9)?,
            },
            M::SensorStateResponse => Self::Sensor {
                key: key()?,
                state: f.float(2)?,
                missing_state: f.boolean(3)?,
            },
            M::SwitchStateResponse => Self::Switch {
                key: key()?,
                state: f.boolean(2)?,
            },
            M::TextSensorStateResponse => Self::TextSensor {
                key: key()?,
                state: f.string(2)?,
                missing_state: f.boolean(3)?,
            },
            M::NumberStateResponse => Self::Number {
                key: key()?,
                state: f.float(2)?,
                missing_state: f.boolean(3)?,
            },
            M::SirenStateResponse => Self::Siren {
                key: key()?,
                state: f.boolean(2)?,
            },
            M::LockStateResponse => Self::Lock {
                key: key()?,
                state: LockState::from_wire(f.uint32(2)?),
            },
            M::MediaPlayerStateResponse => Self::MediaPlayer {
                key: key()?,
                state: MediaPlayerState::from_wire(f.uint32(2)?),
                volume: f.float(3)?,
                muted: f.boolean(4)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(state))
    }
}
