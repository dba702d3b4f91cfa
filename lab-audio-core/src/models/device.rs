use std::fmt;

use serde::{Deserialize, Serialize};

/// Host audio API a device is exposed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostApi {
    Wasapi,
    DirectSound,
    Mme,
    CoreAudio,
    Alsa,
    PulseAudio,
    Jack,
    #[default]
    Unknown,
}

/// Direction of a driver stream. Capture and playback streams on the same
/// physical index are distinct registry entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Capture,
    Playback,
}

/// A physical audio device as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: i32,
    pub name: String,
    pub host_api: HostApi,
    pub input_channels: u16,
    pub output_channels: u16,
    pub default_sample_rate: u32,
}

impl DeviceDescriptor {
    /// Whether the device can record (has at least one input channel).
    pub fn is_capture(&self) -> bool {
        self.input_channels > 0
    }

    /// Whether the device can play (has at least one output channel).
    pub fn is_playback(&self) -> bool {
        self.output_channels > 0
    }

    /// Whether `selector` addresses this device by index or by name.
    pub fn matches(&self, selector: &DeviceSelector) -> bool {
        match selector {
            DeviceSelector::Index(index) => *index == self.index,
            DeviceSelector::Name(name) => *name == self.name,
        }
    }
}

/// How a caller addresses a device: by driver index or by name.
///
/// User text is turned into a selector by [`DeviceSelector::parse`]; a value
/// that reads as an integer is an index, anything else is a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    Index(i32),
    Name(String),
}

impl DeviceSelector {
    /// Index that stands for "the default device".
    pub const DEFAULT_INDEX: i32 = -1;

    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<i32>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(trimmed.to_string()),
        }
    }

    /// Whether this selector asks for the default device.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Index(Self::DEFAULT_INDEX))
    }
}

impl From<i32> for DeviceSelector {
    fn from(index: i32) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for DeviceSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{}", index),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Summary of a device for host-side pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDevice {
    pub device_name: String,
    /// Name when the device has one, index otherwise.
    pub index: DeviceSelector,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}
