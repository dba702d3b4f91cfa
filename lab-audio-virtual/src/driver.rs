//! In-memory audio driver.
//!
//! All virtual streams share one state table with the driver, so tests can
//! reach in while sessions run: queue capture chunks, put a device to sleep,
//! unplug it, or check how often its stream was opened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use lab_audio_core::models::device::{DeviceDescriptor, StreamDirection};
use lab_audio_core::models::error::AudioError;
use lab_audio_core::models::stream::StreamRequest;
use lab_audio_core::session::registry::StreamKey;
use lab_audio_core::traits::driver::{AudioDriver, DriverStream};

use crate::device::VirtualDevice;
use crate::stream::VirtualStream;

/// Lifecycle counters for one (device, direction) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub opened: usize,
    pub closed: usize,
    pub starts: usize,
    pub stops: usize,
}

#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) devices: Vec<VirtualDevice>,
    pub(crate) rejected_rates: HashSet<(i32, u32)>,
    /// (speaker index, microphone index) pairs where the mic hears the speaker.
    pub(crate) links: HashSet<(i32, i32)>,
    /// First-channel samples of each speaker currently playing.
    pub(crate) playing: HashMap<i32, Vec<f32>>,
    pub(crate) stats: HashMap<StreamKey, StreamStats>,
    pub(crate) enumeration_fails: bool,
}

impl Shared {
    pub(crate) fn device(&self, index: i32) -> Option<&VirtualDevice> {
        self.devices.iter().find(|d| d.index() == index)
    }

    pub(crate) fn device_mut(&mut self, index: i32) -> Option<&mut VirtualDevice> {
        self.devices.iter_mut().find(|d| d.index() == index)
    }

    pub(crate) fn stats_mut(&mut self, key: StreamKey) -> &mut StreamStats {
        self.stats.entry(key).or_default()
    }

    /// Loopback signal a microphone picks up from linked speakers.
    pub(crate) fn loopback_sources(&self, microphone: i32) -> Vec<&[f32]> {
        self.links
            .iter()
            .filter(|(_, mic)| *mic == microphone)
            .filter_map(|(speaker, _)| self.playing.get(speaker))
            .filter(|samples| !samples.is_empty())
            .map(|samples| samples.as_slice())
            .collect()
    }
}

/// Audio driver backed entirely by memory.
///
/// Cloning yields another handle on the same simulated hardware.
#[derive(Clone)]
pub struct VirtualDriver {
    shared: Arc<Mutex<Shared>>,
    origin: Instant,
}

impl Default for VirtualDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDriver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            origin: Instant::now(),
        }
    }

    pub fn with_device(self, device: VirtualDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: VirtualDevice) {
        self.shared.lock().devices.push(device);
    }

    /// Unplug a device. Its open streams fail on the next read.
    pub fn remove_device(&self, index: i32) -> bool {
        let mut shared = self.shared.lock();
        let before = shared.devices.len();
        shared.devices.retain(|d| d.index() != index);
        shared.devices.len() != before
    }

    /// Make opening a stream at `rate` on `index` fail.
    pub fn reject_sample_rate(&self, index: i32, rate: u32) {
        self.shared.lock().rejected_rates.insert((index, rate));
    }

    /// Let `microphone` hear whatever `speaker` plays.
    pub fn link(&self, speaker: i32, microphone: i32) {
        self.shared.lock().links.insert((speaker, microphone));
    }

    /// Stop a device delivering samples until a stream is reopened on it.
    pub fn put_to_sleep(&self, index: i32) {
        self.update(index, |d| d.asleep = true);
    }

    pub fn is_asleep(&self, index: i32) -> bool {
        self.shared.lock().device(index).is_some_and(|d| d.asleep)
    }

    pub fn push_chunk(&self, index: i32, samples: Vec<f32>) {
        self.update(index, |d| d.script.push_back(samples));
    }

    pub fn set_level(&self, index: i32, level: f32) {
        self.update(index, |d| d.level = level);
    }

    pub fn set_frames_per_read(&self, index: i32, frames: usize) {
        self.update(index, |d| d.frames_per_read = frames);
    }

    pub fn set_failing_reads(&self, index: i32, failing: bool) {
        self.update(index, |d| d.failing_reads = failing);
    }

    pub fn set_enumeration_failure(&self, fails: bool) {
        self.shared.lock().enumeration_fails = fails;
    }

    pub fn stats(&self, key: StreamKey) -> StreamStats {
        self.shared.lock().stats.get(&key).copied().unwrap_or_default()
    }

    pub fn is_playing(&self, speaker: i32) -> bool {
        self.shared.lock().playing.contains_key(&speaker)
    }

    /// Seconds since the driver was created; the clock all stream times use.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn update(&self, index: i32, f: impl FnOnce(&mut VirtualDevice)) {
        match self.shared.lock().device_mut(index) {
            Some(device) => f(device),
            None => log::warn!("No virtual device #{}", index),
        }
    }
}

impl AudioDriver for VirtualDriver {
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
        let shared = self.shared.lock();
        if shared.enumeration_fails {
            return Err(AudioError::Driver("device enumeration failed".into()));
        }
        Ok(shared.devices.iter().map(|d| d.descriptor.clone()).collect())
    }

    fn open_stream(&self, request: &StreamRequest) -> Result<Box<dyn DriverStream>, AudioError> {
        let mut shared = self.shared.lock();
        let index = request.device_index;
        let rejected = shared.rejected_rates.contains(&(index, request.sample_rate));

        let device = shared
            .device_mut(index)
            .ok_or_else(|| AudioError::DeviceNotConnected(format!("no virtual device #{}", index)))?;

        let available = match request.direction {
            StreamDirection::Capture => device.descriptor.input_channels,
            StreamDirection::Playback => device.descriptor.output_channels,
        };
        if available == 0 || request.channels > available {
            return Err(AudioError::Driver(format!(
                "device #{} cannot open {} {:?} channels",
                index, request.channels, request.direction
            )));
        }

        if rejected {
            return Err(AudioError::Driver(format!(
                "device #{} does not support {} Hz",
                index, request.sample_rate
            )));
        }
        if request.direction == StreamDirection::Capture {
            device.asleep = false;
        }

        shared
            .stats_mut(StreamKey {
                device_index: index,
                direction: request.direction,
            })
            .opened += 1;

        log::debug!(
            "Opened virtual {:?} stream on device #{} at {} Hz",
            request.direction,
            index,
            request.sample_rate
        );
        Ok(Box::new(VirtualStream::new(
            Arc::clone(&self.shared),
            self.origin,
            request.clone(),
        )))
    }
}
