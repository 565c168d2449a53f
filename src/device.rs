//! Records decoded from the gateway's JSON, which keys every attribute by a
//! numeric string rather than a name.

use std::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::Command;

pub const ROOT_DEVICES: &str = "15001";
pub const ROOT_GROUPS: &str = "15004";
pub const ROOT_MOODS: &str = "15005";
pub const ROOT_SMART_TASKS: &str = "15010";
pub const ROOT_GATEWAY: &str = "15011";
pub const ATTR_GATEWAY_INFO: &str = "15012";

const ATTR_LIGHT_CONTROL: &str = "3311";
const ATTR_LIGHT_DIMMER: &str = "5851";
const ATTR_LIGHT_COLOR_X: &str = "5709";
const ATTR_LIGHT_COLOR_Y: &str = "5710";
const ATTR_TRANSITION_TIME: &str = "5712";

/// Highest level the gateway accepts for a dimmer.
pub const DIMMER_MAX: u8 = 254;

/// A point in the CIE xy chromaticity space, scaled to the gateway's
/// 0..=65535 integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xy {
    pub x: u16,
    pub y: u16,
}

impl Xy {
    pub const fn new(x: u16, y: u16) -> Self {
        Xy { x, y }
    }
}

impl Display for Xy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Fade duration the gateway applies to a change, sent in tenths of a second.
#[derive(Debug, Clone, Copy)]
struct TransitionTime(Duration);

impl Serialize for TransitionTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ((self.0.as_millis() / 100) as u64).serialize(serializer)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    #[serde(rename = "0", default)]
    pub manufacturer: String,
    #[serde(rename = "1", default)]
    pub model: String,
    #[serde(rename = "3", default)]
    pub firmware: String,
}

#[derive(Deserialize, Debug)]
struct RawDevice {
    #[serde(rename = "9003")]
    id: u64,
    #[serde(rename = "9001", default)]
    name: String,
    #[serde(rename = "5750")]
    application_type: Option<u8>,
    #[serde(rename = "3", default)]
    info: DeviceInfo,
    #[serde(rename = "3311", default)]
    light_control: Vec<serde::de::IgnoredAny>,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: u64,
    pub name: String,
    pub application_type: Option<u8>,
    pub info: DeviceInfo,
    light_channels: usize,
    raw: Value,
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let device = RawDevice::deserialize(&raw).map_err(serde::de::Error::custom)?;
        Ok(Device {
            id: device.id,
            name: device.name,
            application_type: device.application_type,
            info: device.info,
            light_channels: device.light_control.len(),
            raw,
        })
    }
}

impl Device {
    pub fn has_light_control(&self) -> bool {
        self.light_channels > 0
    }

    /// The JSON exactly as the gateway sent it.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn light(&self) -> Option<Light> {
        if self.has_light_control() {
            Some(Light {
                id: self.id,
                name: self.name.clone(),
            })
        } else {
            None
        }
    }
}

/// Handle to a controllable bulb. Only identifies the bulb; its colour and
/// brightness live on the gateway and are changed through [`Command`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Light {
    pub id: u64,
    pub name: String,
}

impl Light {
    pub fn new<T: Into<String>>(id: u64, name: T) -> Self {
        Light {
            id,
            name: name.into(),
        }
    }

    fn control(&self, mut change: Value, transition: Option<Duration>) -> Command {
        if let (Some(transition), Value::Object(change)) = (transition, &mut change) {
            change.insert(ATTR_TRANSITION_TIME.into(), json!(TransitionTime(transition)));
        }
        Command::put(
            [ROOT_DEVICES.to_string(), self.id.to_string()],
            json!({ ATTR_LIGHT_CONTROL: [change] }),
        )
    }

    pub fn set_xy_color(&self, color: Xy, transition: Option<Duration>) -> Command {
        self.control(
            json!({ ATTR_LIGHT_COLOR_X: color.x, ATTR_LIGHT_COLOR_Y: color.y }),
            transition,
        )
    }

    pub fn set_dimmer(&self, level: u8, transition: Option<Duration>) -> Command {
        self.control(
            json!({ ATTR_LIGHT_DIMMER: level.min(DIMMER_MAX) }),
            transition,
        )
    }
}

impl Display for Light {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembers {
    #[serde(rename = "9003", default)]
    pub ids: Vec<u64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
struct RawGroupMembers {
    #[serde(rename = "15002", default)]
    devices: GroupMembers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub on: bool,
    pub dimmer: u8,
    pub members: Vec<u64>,
}

impl<'de> Deserialize<'de> for Group {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawGroup {
            #[serde(rename = "9003")]
            id: u64,
            #[serde(rename = "9001", default)]
            name: String,
            #[serde(rename = "5850", default)]
            state: u8,
            #[serde(rename = "5851", default)]
            dimmer: u8,
            #[serde(rename = "9018", default)]
            members: RawGroupMembers,
        }

        let raw = RawGroup::deserialize(deserializer)?;
        Ok(Group {
            id: raw.id,
            name: raw.name,
            on: raw.state == 1,
            dimmer: raw.dimmer,
            members: raw.members.devices.ids,
        })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mood {
    #[serde(rename = "9003")]
    pub id: u64,
    #[serde(rename = "9001", default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    NotAtHome,
    LightsOff,
    WakeUp,
    Other(u8),
}

impl From<u8> for TaskType {
    fn from(code: u8) -> Self {
        match code {
            1 => TaskType::NotAtHome,
            2 => TaskType::WakeUp,
            4 => TaskType::LightsOff,
            other => TaskType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartTask {
    pub id: u64,
    pub enabled: bool,
    pub task_type: TaskType,
}

impl<'de> Deserialize<'de> for SmartTask {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawTask {
            #[serde(rename = "9003")]
            id: u64,
            #[serde(rename = "5850", default)]
            state: u8,
            #[serde(rename = "9040", default)]
            task_type: u8,
        }

        let raw = RawTask::deserialize(deserializer)?;
        Ok(SmartTask {
            id: raw.id,
            enabled: raw.state == 1,
            task_type: raw.task_type.into(),
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayInfo {
    #[serde(rename = "9029", default)]
    pub firmware_version: String,
    #[serde(rename = "9083", default)]
    pub homekit_id: Option<String>,
    #[serde(rename = "9023", default)]
    pub ntp_server: String,
    #[serde(rename = "9059", default)]
    pub current_time: Option<u64>,
}
