//! Commands sent to entities.
//!
//! Most command messages use a "has-X / X" pair for every optional
//! setting: a bool telling the node the value is meaningful, followed by
//! the value. Here each such pair is a single `Option<_>` field;
//! [`TagMap::with_present`] writes both halves when it is `Some` and
//! neither when it is `None`.

use serde::Serialize;

use crate::state::FanDirection;
use crate::{EntityKey, MessageType, TagMap};

/// What to tell a lock to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Unlock,
    Lock,
    Open,
}

impl LockAction {
    fn to_wire(self) -> u64 {
        match self {
            Self::Unlock => 0,
            Self::Lock => 1,
            Self::Open => 2,
        }
    }
}

/// Transport control for a media player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPlayerAction {
    Play,
    Pause,
    Stop,
    Mute,
    Unmute,
}

impl MediaPlayerAction {
    fn to_wire(self) -> u64 {
        match self {
            Self::Play => 0,
            Self::Pause => 1,
            Self::Stop => 2,
            Self::Mute => 3,
            Self::Unmute => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CoverCommand {
    pub key: EntityKey,
    pub position: Option<f32>,
    pub tilt: Option<f32>,
    pub stop: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FanCommand {
    pub key: EntityKey,
    pub state: Option<bool>,
    pub oscillating: Option<bool>,
    pub direction: Option<FanDirection>,
    pub speed_level: Option<i32>,
    pub preset_mode: Option<String>,
}

/// Light command. RGB is set as a unit, so it is one optional triple.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LightCommand {
    pub key: EntityKey,
    pub state: Option<bool>,
    pub brightness: Option<f32>,
    pub color_mode: Option<u32>,
    pub color_brightness: Option<f32>,
    pub rgb: Option<(f32, f32, f32)>,
    pub white: Option<f32>,
    pub color_temperature: Option<f32>,
    pub cold_white: Option<f32>,
    pub warm_white: Option<f32>,
    /// Transition length in milliseconds.
    pub transition_length: Option<u32>,
    /// Flash length in milliseconds.
    pub flash_length: Option<u32>,
    pub effect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SirenCommand {
    pub key: EntityKey,
    pub state: Option<bool>,
    pub tone: Option<String>,
    /// Duration in seconds.
    pub duration: Option<u32>,
    pub volume: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockCommand {
    pub key: EntityKey,
    pub action: LockAction,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MediaPlayerCommand {
    pub key: EntityKey,
    pub action: Option<MediaPlayerAction>,
    pub volume: Option<f32>,
    pub media_url: Option<String>,
}

/// A command for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum Command {
    Cover(CoverCommand),
    Fan(FanCommand),
    Light(LightCommand),
    Switch { key: EntityKey, state: bool },
    Number { key: EntityKey, state: f32 },
    Siren(SirenCommand),
    Lock(LockCommand),
    Button { key: EntityKey },
    MediaPlayer(MediaPlayerCommand),
}

fn put_string(map: TagMap, field: u32, value: String) -> TagMap {
    map.with_string(field, &value)
}

impl Command {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Cover(c) => c.key,
            Self::Fan(c) => c.key,
            Self::Light(c) => c.key,
            Self::Switch { key, .. }
            | Self::Number { key, .. }
            | Self::Button { key } => *key,
            Self::Siren(c) => c.key,
            Self::Lock(c) => c.key,
            Self::MediaPlayer(c) => c.key,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Cover(_) => MessageType::CoverCommandRequest,
            Self::Fan(_) => MessageType::FanCommandRequest,
            Self::Light(_) => MessageType::LightCommandRequest,
            Self::Switch { .. } => MessageType::SwitchCommandRequest,
            Self::Number { .. } => MessageType::NumberCommandRequest,
            Self::Siren(_) => MessageType::SirenCommandRequest,
            Self::Lock(_) => MessageType::LockCommandRequest,
            Self::Button { .. } => MessageType::ButtonCommandRequest,
            Self::MediaPlayer(_) => MessageType::MediaPlayerCommandRequest,
        }
    }

    /// Lays the command out in its message's field numbering.
    pub fn to_fields(&self) -> TagMap {
        let map = TagMap::new().with_fixed32(1, self.key().0);
        match self {
            Self::Cover(c) => map
                .with_present(4, 5, c.position, TagMap::with_float)
                .with_present(6, 7, c.tilt, TagMap::with_float)
                .with_bool(8, c.stop),
            Self::Fan(c) => map
                .with_present(2, 3, c.state, TagMap::with_bool)
                .with_present(6, 7, c.oscillating, TagMap::with_bool)
                .with_present(8, 9, c.direction, |m, f, d| {
                    m.with_uint(f, d.to_wire())
                })
                .with_present(10, 11, c.speed_level, TagMap::with_int32)
                .with_present(12, 13, c.preset_mode.clone(), put_string),
            Self::Light(c) => map
                .with_present(2, 3, c.state, TagMap::with_bool)
                .with_present(4, 5, c.brightness, TagMap::with_float)
                .with_present(22, 23, c.color_mode, |m, f, v| {
                    m.with_uint(f, u64::from(v))
                })
                .with_present(20, 21, c.color_brightness, TagMap::with_float)
                .with_present(6, 7, c.rgb, |m, f, (r, g, b)| {
                    m.with_float(f, r).with_float(f + 1, g).with_float(f + 2, b)
                })
                .with_present(10, 11, c.white, TagMap::with_float)
                .with_present(12, 13, c.color_temperature, TagMap::with_float)
                .with_present(24, 25, c.cold_white, TagMap::with_float)
                .with_present(26, 27, c.warm_white, TagMap::with_float)
                .with_present(14, 15, c.transition_length, |m, f, v| {
                    m.with_uint(f, u64::from(v))
                })
                .with_present(16, 17, c.flash_length, |m, f, v| {
                    m.with_uint(f, u64::from(v))
                })
                .with_present(18, 19, c.effect.clone(), put_string),
            Self::Switch { state, .. } => map.with_bool(2, *state),
            Self::Number { state, .. } => map.with_float(2, *state),
            Self::Siren(c) => map
                .with_present(2, 3, c.state, TagMap::with_bool)
                .with_present(4, 5, c.tone.clone(), put_string)
                .with_present(6, 7, c.duration, |m, f, v| {
                    m.with_uint(f, u64::from(v))
                })
                .with_present(8, 9, c.volume, TagMap::with_float),
            Self::Lock(c) => map
                .with_uint(2, c.action.to_wire())
                .with_present(3, 4, c.code.clone(), put_string),
            Self::Button { .. } => map,
            Self::MediaPlayer(c) => map
                .with_present(2, 3, c.action, |m, f, a| {
                    m.with_uint(f, a.to_wire())
                })
                .with_present(4, 5, c.volume, TagMap::with_float)
                .with_present(6, 7, c.media_url.clone(), put_string),
        }
    }
}
