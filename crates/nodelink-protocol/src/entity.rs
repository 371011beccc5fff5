//! Entity descriptors: what a node tells us about each of its sensors and
//! actuators during the listing phase.
//!
//! Every `ListEntities*Response` shares the same four leading fields
//! (object id, key, name, unique id). The rest of the layout is
//! platform-specific, including where icon, "disabled by default" and
//! entity category live, so each platform names its own field numbers.

use std::fmt;

use serde::Serialize;

use crate::{MessageType, ProtocolError, TagMap};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identifier of one entity on one node.
///
/// Carried on the wire as a `fixed32` hash of the object id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityKey(pub u32);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Which platform an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    BinarySensor,
    Cover,
    Fan,
    Light,
    Sensor,
    Switch,
    TextSensor,
    Camera,
    Number,
    Siren,
    Lock,
    Button,
    MediaPlayer,
}

impl EntityKind {
    /// The listing message type that describes entities of this kind.
    pub fn listing_type(self) -> MessageType {
        match self {
            Self::BinarySensor => MessageType::ListEntitiesBinarySensorResponse,
            Self::Cover => MessageType::ListEntitiesCoverResponse,
            Self::Fan => MessageType::ListEntitiesFanResponse,
            Self::Light => MessageType::ListEntitiesLightResponse,
            Self::Sensor => MessageType::ListEntitiesSensorResponse,
            Self::Switch => MessageType::ListEntitiesSwitchResponse,
            Self::TextSensor => MessageType::ListEntitiesTextSensorResponse,
            Self::Camera => MessageType::ListEntitiesCameraResponse,
            Self::Number => MessageType::ListEntitiesNumberResponse,
            Self::Siren => MessageType::ListEntitiesSirenResponse,
            Self::Lock => MessageType::ListEntitiesLockResponse,
            Self::Button => MessageType::ListEntitiesButtonResponse,
            Self::MediaPlayer => MessageType::ListEntitiesMediaPlayerResponse,
        }
    }

    /// Inverse of [`listing_type`](Self::listing_type).
    pub fn from_listing_type(message_type: MessageType) -> Option<Self> {
        use MessageType as M;
        Some(match message_type {
            M::ListEntitiesBinarySensorResponse => Self::BinarySensor,
            M::ListEntitiesCoverResponse => Self::Cover,
            M::ListEntitiesFanResponse => Self::Fan,
            M::ListEntitiesLightResponse => Self::Light,
            M::ListEntitiesSensorResponse => Self::Sensor,
            M::ListEntitiesSwitchResponse => Self::Switch,
            M::ListEntitiesTextSensorResponse => Self::TextSensor,
            M::ListEntitiesCameraResponse => Self::Camera,
            M::ListEntitiesNumberResponse => Self::Number,
            M::ListEntitiesSirenResponse => Self::Siren,
            M::ListEntitiesLockResponse => Self::Lock,
            M::ListEntitiesButtonResponse => Self::Button,
            M::ListEntitiesMediaPlayerResponse => Self::MediaPlayer,
            _ => return None,
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BinarySensor => "binary_sensor",
            Self::Cover => "cover",
            Self::Fan => "fan",
            Self::Light => "light",
            Self::Sensor => "sensor",
            Self::Switch => "switch",
            Self::TextSensor => "text_sensor",
            Self::Camera => "camera",
            Self::Number => "number",
            Self::Siren => "siren",
            Self::Lock => "lock",
            Self::Button => "button",
            Self::MediaPlayer => "media_player",
        };
        f.write_str(name)
    }
}

/// How the node suggests an entity be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    #[default]
    None,
    Config,
    Diagnostic,
}

impl EntityCategory {
    fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Config,
            2 => Self::Diagnostic,
            _ => Self::None,
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Everything a listing response says about one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInfo {
    pub key: EntityKey,
    pub object_id: String,
    pub name: String,
    pub unique_id: String,
    pub icon: String,
    pub disabled_by_default: bool,
    pub category: EntityCategory,
    pub platform: PlatformInfo,
}

impl EntityInfo {
    pub fn kind(&self) -> EntityKind {
        self.platform.kind()
    }
}

/// Platform-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum PlatformInfo {
    BinarySensor {
        device_class: String,
        is_status_binary_sensor: bool,
    },
    Cover {
        assumed_state: bool,
        supports_position: bool,
        supports_tilt: bool,
        supports_stop: bool,
        device_class: String,
    },
    Fan {
        supports_oscillation: bool,
        supports_speed: bool,
        supports_direction: bool,
        supported_speed_count: i32,
        supported_preset_modes: Vec<String>,
    },
    Light {
        /// Raw color-mode bitmask values, one per supported mode.
        supported_color_modes: Vec<u32>,
        min_mireds: f32,
        max_mireds: f32,
        effects: Vec<String>,
    },
    Sensor {
        unit_of_measurement: String,
        accuracy_decimals: i32,
        force_update: bool,
        device_class: String,
        state_class: u32,
    },
    Switch {
        assumed_state: bool,
        device_class: String,
    },
    TextSensor {
        device_class: String,
    },
    Camera,
    Number {
        min_value: f32,
        max_value: f32,
        step: f32,
        unit_of_measurement: String,
        mode: u32,
        device_class: String,
    },
    Siren {
        tones: Vec<String>,
        supports_duration: bool,
        supports_volume: bool,
    },
    Lock {
        assumed_state: bool,
        supports_open: bool,
        requires_code: bool,
        code_format: String,
    },
    Button {
        device_class: String,
    },
    MediaPlayer {
        supports_pause: bool,
    },
}

impl PlatformInfo {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::BinarySensor { .. } => EntityKind::BinarySensor,
            Self::Cover { .. } => EntityKind::Cover,
            Self::Fan { .. } => EntityKind::Fan,
            Self::Light { .. } => EntityKind::Light,
            Self::Sensor { .. } => EntityKind::Sensor,
            Self::Switch { .. } => EntityKind::Switch,
            Self::TextSensor { .. } => EntityKind::TextSensor,
            Self::Camera => EntityKind::Camera,
            Self::Number { .. } => EntityKind::Number,
            Self::Siren { .. } => EntityKind::Siren,
            Self::Lock { .. } => EntityKind::Lock,
            Self::Button { .. } => EntityKind::Button,
            Self::MediaPlayer { .. } => EntityKind::MediaPlayer,
        }
    }
}

/// Field numbers of the three presentation fields, which move around
/// between platforms.
struct Presentation {
    icon: u32,
    disabled_by_default: u32,
    category: u32,
}

const fn presentation(icon: u32, disabled_by_default: u32, category: u32) -> Presentation {
    Presentation {
        icon,
        disabled_by_default,
        category,
    }
}

impl EntityInfo {
    /// Decodes a listing response of the given platform.
    ///
    /// # Errors
    /// Returns [`ProtocolError::FieldType`] if any field is on the wire
    /// with a type other than the one the layout prescribes.
    pub fn decode(kind: EntityKind, f: &TagMap) -> Result<Self, ProtocolError> {
        let (layout, platform) = match kind {
            EntityKind::BinarySensor => (
                presentation(8, 7, 9),
                PlatformInfo::BinarySensor {
                    device_class: f.string(5)?,
                    is_status_binary_sensor: f.boolean(6)?,
                },
            ),
            EntityKind::Cover => (
                presentation(10, 9, 11),
                PlatformInfo::Cover {
                    assumed_state: f.boolean(5)?,
                    supports_position: f.boolean(6)?,
                    supports_tilt: f.boolean(7)?,
                    device_class: f.string(8)?,
                    supports_stop: f.boolean(12)?,
                },
            ),
            EntityKind::Fan => (
                presentation(10, 9, 11),
                PlatformInfo::Fan {
                    supports_oscillation: f.boolean(5)?,
                    supports_speed: f.boolean(6)?,
                    supports_direction: f.boolean(7)?,
                    supported_speed_count: f.int32(8)?,
                    supported_preset_modes: f.strings(12)?,
                },
            ),
            EntityKind::Light => (
                presentation(14, 13, 15),
                PlatformInfo::Light {
                    supported_color_modes: f
                        .uints(12)?
                        .into_iter()
                        .map(|m| m as u32)
                        .collect(),
                    min_mireds: f.float(9)?,
                    max_mireds: f.float(10)?,
                    effects: f.strings(11)?,
                },
            ),
            EntityKind::Sensor => (
                presentation(5, 12, 13),
                PlatformInfo::Sensor {
                    unit_of_measurement: f.string(6)?,
                    accuracy_decimals: f.int32(7)?,
                    force_update: f.boolean(8)?,
                    device_class: f.string(9)?,
                    state_class: f.uint32(10)?,
                },
            ),
            EntityKind::Switch => (
                presentation(5, 7, 8),
                PlatformInfo::Switch {
                    assumed_state: f.boolean(6)?,
                    device_class: f.string(9)?,
                },
            ),
            EntityKind::TextSensor => (
                presentation(5, 6, 7),
                PlatformInfo::TextSensor {
                    device_class: f.string(8)?,
                },
            ),
            EntityKind::Camera => (presentation(6, 5, 7), PlatformInfo::Camera),
            EntityKind::Number => (
                presentation(5, 9, 10),
                PlatformInfo::Number {
                    min_value: f.float(6)?,
                    max_value: f.float(7)?,
                    step: f.float(8)?,
                    unit_of_measurement: f.string(11)?,
                    mode: f.uint32(12)?,
                    device_class: f.string(13)?,
                },
            ),
            EntityKind::Siren => (
                presentation(5, 6, 10),
                PlatformInfo::Siren {
                    tones: f.strings(7)?,
                    supports_duration: f.boolean(8)?,
                    supports_volume: f.boolean(9)?,
                },
            ),
            EntityKind::Lock => (
                presentation(5, 6, 7),
                PlatformInfo::Lock {
                    assumed_state: f.boolean(8)?,
                    supports_open: f.boolean(9)?,
                    requires_code: f.boolean(10)?,
                    code_format: f.string(11)?,
                },
            ),
            EntityKind::Button => (
                presentation(5, 6, 7),
                PlatformInfo::Button {
                    device_class: f.string(8)?,
                },
            ),
            EntityKind::MediaPlayer => (
                presentation(5, 6, 7),
                PlatformInfo::MediaPlayer {
                    supports_pause: f.boolean(8)?,
                },
            ),
        };

        Ok(Self {
            object_id: f.string(1)?,
            key: EntityKey(f.fixed32(2)?),
            name: f.string(3)?,
            unique_id: f.string(4)?,
            icon: f.string(layout.icon)?,
            disabled_by_default: f.boolean(layout.disabled_by_default)?,
            category: EntityCategory::from_wire(f.uint32(layout.category)?),
            platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    fn common(key: u32, name: &str) -> TagMap {
        TagMap::new()
            .with_string(1, &name.to_lowercase())
            .with_fixed32(2, key)
            .with_string(3, name)
            .with_string(4, &format!("node-{key}"))
    }

    #[test]
    fn test_decode_sensor_reads_platform_fields() {
        let f = common(0xABCD, "Temperature")
            .with_string(5, "mdi:thermometer")
            .with_string(6, "°C")
            .with_int32(7, 1)
            .with_string(9, "temperature")
            .with_uint(10, 1)
            .with_uint(13, 2);

        let info = EntityInfo::decode(EntityKind::Sensor, &f).unwrap();

        assert_eq!(info.key, EntityKey(0xABCD));
        assert_eq!(info.name, "Temperature");
        assert_eq!(info.object_id, "temperature");
        assert_eq!(info.icon, "mdi:thermometer");
        assert_eq!(info.category, EntityCategory::Diagnostic);
        assert_eq!(
            info.platform,
            PlatformInfo::Sensor {
                unit_of_measurement: "°C".into(),
                accuracy_decimals: 1,
                force_update: false,
                device_class: "temperature".into(),
                state_class: 1,
            }
        );
        assert_eq!(info.kind(), EntityKind::Sensor);
    }

    #[test]
    fn test_decode_light_collects_repeated_fields() {
        let mut f = common(7, "Lamp")
            .with_float(9, 153.0)
            .with_float(10, 500.0);
        for mode in [1u64, 3, 35] {
            f.push(12, FieldValue::Varint(mode));
        }
        for effect in ["None", "Rainbow"] {
            f.push(11, FieldValue::Bytes(effect.as_bytes().to_vec()));
        }

        let info = EntityInfo::decode(EntityKind::Light, &f).unwrap();

        match info.platform {
            PlatformInfo::Light {
                supported_color_modes,
                min_mireds,
                max_mireds,
                effects,
            } => {
                assert_eq!(supported_color_modes, vec![1, 3, 35]);
                assert_eq!(min_mireds, 153.0);
                assert_eq!(max_mireds, 500.0);
                assert_eq!(effects, vec!["None", "Rainbow"]);
            }
            other => panic!("expected light, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_key_sent_as_varint_is_type_error() {
        let mut f = TagMap::new();
        f.insert(2, FieldValue::Varint(5));

        let result = EntityInfo::decode(EntityKind::Button, &f);

        assert!(matches!(result, Err(ProtocolError::FieldType { field: 2, .. })));
    }

    #[test]
    fn test_listing_type_round_trips_every_kind() {
        let kinds = [
            EntityKind::BinarySensor,
            EntityKind::Cover,
            EntityKind::Fan,
            EntityKind::Light,
            EntityKind::Sensor,
            EntityKind::Switch,
            EntityKind::TextSensor,
            EntityKind::Camera,
            EntityKind::Number,
            EntityKind::Siren,
            EntityKind::Lock,
            EntityKind::Button,
            EntityKind::MediaPlayer,
        ];
        for kind in kinds {
            assert_eq!(EntityKind::from_listing_type(kind.listing_type()), Some(kind));
        }
        assert_eq!(EntityKind::from_listing_type(MessageType::PingRequest), None);
    }

    #[test]
    fn test_entity_key_display_is_hex() {
        assert_eq!(EntityKey(0xBEEF).to_string(), "0000beef");
    }

    #[test]
    fn test_entity_info_serializes_with_platform_tag() {
        let info = EntityInfo::decode(EntityKind::Button, &common(1, "Restart")).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["platform"]["platform"], "button");
        assert_eq!(json["key"], 1);
    }
}
