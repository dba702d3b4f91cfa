use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volume reading dispatched by a microphone to its listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrophoneResponse {
    pub timestamp: DateTime<Utc>,
    /// RMS volume scaled by 10 and rounded to 3 decimals.
    pub volume: f64,
    pub device_index: i32,
    pub device_name: String,
}

/// Message payloads delivered to device listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceMessage {
    Microphone(MicrophoneResponse),
    /// A session recovered a device that had stopped delivering samples.
    DeviceRecovered {
        timestamp: DateTime<Utc>,
        device_index: i32,
    },
}

impl DeviceMessage {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Microphone(response) => response.timestamp,
            Self::DeviceRecovered { timestamp, .. } => *timestamp,
        }
    }

    pub fn device_index(&self) -> i32 {
        match self {
            Self::Microphone(response) => response.device_index,
            Self::DeviceRecovered { device_index, .. } => *device_index,
        }
    }
}
