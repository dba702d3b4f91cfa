//! Simulated audio endpoints.
//!
//! A virtual device carries the descriptor the driver enumerates plus the
//! behaviour its capture side shows when read: scripted chunks first, then a
//! generated constant-level signal mixed with whatever linked speakers are
//! playing.

use std::collections::VecDeque;

use lab_audio_core::models::device::{DeviceDescriptor, HostApi};

/// Default number of frames a capture read returns once the script runs out.
pub const DEFAULT_FRAMES_PER_READ: usize = 480;

#[derive(Debug, Clone)]
pub struct VirtualDevice {
    pub descriptor: DeviceDescriptor,
    /// Frames generated per read after the script is exhausted. 0 makes the
    /// device deliver nothing.
    pub frames_per_read: usize,
    /// Constant sample value of the generated signal.
    pub level: f32,
    /// Interleaved chunks returned by successive reads, in order.
    pub script: VecDeque<Vec<f32>>,
    /// A sleeping device delivers nothing until a stream is opened on it
    /// again.
    pub asleep: bool,
    /// Reads fail with a driver error while set.
    pub failing_reads: bool,
}

impl VirtualDevice {
    /// Capture-only device.
    pub fn microphone(index: i32, name: &str, sample_rate: u32, channels: u16) -> Self {
        Self::new(DeviceDescriptor {
            index,
            name: name.to_string(),
            host_api: HostApi::Wasapi,
            input_channels: channels,
            output_channels: 0,
            default_sample_rate: sample_rate,
        })
    }

    /// Playback-only device.
    pub fn speaker(index: i32, name: &str, sample_rate: u32, channels: u16) -> Self {
        Self::new(DeviceDescriptor {
            index,
            name: name.to_string(),
            host_api: HostApi::Wasapi,
            input_channels: 0,
            output_channels: channels,
            default_sample_rate: sample_rate,
        })
    }

    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            frames_per_read: DEFAULT_FRAMES_PER_READ,
            level: 0.0,
            script: VecDeque::new(),
            asleep: false,
            failing_reads: false,
        }
    }

    pub fn with_host_api(mut self, host_api: HostApi) -> Self {
        self.descriptor.host_api = host_api;
        self
    }

    pub fn with_level(mut self, level: f32) -> Self {
        self.level = level;
        self
    }

    pub fn with_frames_per_read(mut self, frames: usize) -> Self {
        self.frames_per_read = frames;
        self
    }

    /// Queue a chunk of interleaved samples for a future read.
    pub fn with_chunk(mut self, samples: Vec<f32>) -> Self {
        self.script.push_back(samples);
        self
    }

    pub fn index(&self) -> i32 {
        self.descriptor.index
    }
}
