use serde::{Deserialize, Serialize};

use super::device::StreamDirection;

/// Driver latency class. Higher classes trade compatibility for lower
/// latency and exclusive access to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatencyClass {
    /// Let the OS mixer handle everything.
    Shared,
    /// Low latency, device still shared with other applications.
    LowLatency,
    /// Exclusive control of the device.
    Exclusive,
}

impl LatencyClass {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Shared => 0,
            Self::LowLatency => 1,
            Self::Exclusive => 2,
        }
    }
}

/// Whether the OS may put an idle stream's device to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Device may sleep between recordings; waking it adds latency.
    Standby,
    /// Device is kept running.
    #[default]
    Hot,
}

/// Everything the driver needs to open a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub device_index: i32,
    pub direction: StreamDirection,
    pub sample_rate: u32,
    pub channels: u16,
    pub latency_class: LatencyClass,
}

/// Arguments to `DriverStream::start`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StartRequest {
    /// Playback repetitions; 0 loops until stopped.
    pub repetitions: u32,
    /// Absolute system time to start at; `None` starts as soon as possible.
    pub when: Option<f64>,
    pub wait_for_start: bool,
    /// Absolute system time to stop at.
    pub stop_time: Option<f64>,
}

/// Timing summary reported by the driver when a stream stops.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StopReport {
    pub start_time: f64,
    pub end_position_secs: f64,
    pub xruns: u32,
    pub estimated_stop_time: f64,
}

/// Samples accumulated by the driver since the previous read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapturedAudio {
    /// Interleaved frames in the stream's channel layout.
    pub samples: Vec<f32>,
    pub position_secs: f64,
    pub overflow: bool,
    pub capture_start_time: f64,
}

/// Snapshot of a stream's driver-side status.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamStatus {
    pub active: bool,
    pub sample_rate: u32,
    pub start_time: f64,
    pub capture_start_time: f64,
    pub position_secs: f64,
    pub recorded_secs: f64,
    pub xruns: u32,
    pub latency_bias: f64,
}
