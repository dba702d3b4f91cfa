//! Virtual driver streams.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use lab_audio_core::models::device::StreamDirection;
use lab_audio_core::models::error::AudioError;
use lab_audio_core::models::stream::{
    CapturedAudio, RunMode, StartRequest, StopReport, StreamRequest, StreamStatus,
};
use lab_audio_core::session::registry::StreamKey;
use lab_audio_core::traits::driver::DriverStream;

use crate::driver::Shared;

/// A stream on a [`VirtualDevice`](crate::device::VirtualDevice).
///
/// Capture streams produce one chunk per read while active. Playback streams
/// publish their buffer to the shared table when started, where linked
/// microphones pick it up.
pub struct VirtualStream {
    shared: Arc<Mutex<Shared>>,
    origin: Instant,
    request: StreamRequest,
    active: bool,
    closed: bool,
    run_mode: RunMode,
    latency_bias: f64,
    capture_frames: Option<usize>,
    buffer: Vec<f32>,
    start_time: f64,
    frames_delivered: usize,
    loopback_cursor: usize,
    xruns: u32,
}

impl VirtualStream {
    pub(crate) fn new(shared: Arc<Mutex<Shared>>, origin: Instant, request: StreamRequest) -> Self {
        Self {
            shared,
            origin,
            request,
            active: false,
            closed: false,
            run_mode: RunMode::Hot,
            latency_bias: 0.0,
            capture_frames: None,
            buffer: Vec::new(),
            start_time: 0.0,
            frames_delivered: 0,
            loopback_cursor: 0,
            xruns: 0,
        }
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    fn key(&self) -> StreamKey {
        StreamKey {
            device_index: self.request.device_index,
            direction: self.request.direction,
        }
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn position_secs(&self) -> f64 {
        self.frames_delivered as f64 / self.request.sample_rate as f64
    }

    fn ensure_open(&self) -> Result<(), AudioError> {
        if self.closed {
            Err(AudioError::StreamError(format!(
                "stream on device #{} is closed",
                self.request.device_index
            )))
        } else {
            Ok(())
        }
    }

    /// First channel of the playback buffer, as heard by a linked microphone.
    fn audible_buffer(&self) -> Vec<f32> {
        let ch = self.request.channels.max(1) as usize;
        self.buffer.iter().step_by(ch).copied().collect()
    }

    /// Next generated chunk: the device's constant level plus linked speakers.
    fn generate(&mut self, shared: &Shared) -> Vec<f32> {
        let index = self.request.device_index;
        let Some(device) = shared.device(index) else {
            return Vec::new();
        };

        let frames = device.frames_per_read;
        let ch = self.request.channels as usize;
        let sources = shared.loopback_sources(index);

        let mut samples = Vec::with_capacity(frames * ch);
        for i in 0..frames {
            let heard: f32 = sources
                .iter()
                .map(|src| src[(self.loopback_cursor + i) % src.len()])
                .sum();
            let value = device.level + heard;
            samples.extend(std::iter::repeat(value).take(ch));
        }
        self.loopback_cursor += frames;
        samples
    }
}

impl DriverStream for VirtualStream {
    fn start(&mut self, request: StartRequest) -> Result<f64, AudioError> {
        self.ensure_open()?;

        if !self.active {
            self.start_time = request.when.unwrap_or_else(|| self.now());
            self.frames_delivered = 0;
        }
        self.active = true;

        let mut shared = self.shared.lock();
        if self.request.direction == StreamDirection::Playback && !self.buffer.is_empty() {
            shared.playing.insert(self.request.device_index, self.audible_buffer());
        }
        shared.stats_mut(self.key()).starts += 1;
        Ok(self.start_time)
    }

    fn stop(&mut self, _block_until_stopped: bool, stop_time: Option<f64>) -> Result<StopReport, AudioError> {
        self.ensure_open()?;

        self.active = false;
        let mut shared = self.shared.lock();
        if self.request.direction == StreamDirection::Playback {
            shared.playing.remove(&self.request.device_index);
        }
        shared.stats_mut(self.key()).stops += 1;
        drop(shared);

        Ok(StopReport {
            start_time: self.start_time,
            end_position_secs: self.position_secs(),
            xruns: self.xruns,
            estimated_stop_time: stop_time.unwrap_or_else(|| self.now()),
        })
    }

    fn read_audio(&mut self) -> Result<CapturedAudio, AudioError> {
        self.ensure_open()?;
        if self.request.direction != StreamDirection::Capture {
            return Err(AudioError::Driver("not a capture stream".into()));
        }

        let mut captured = CapturedAudio {
            capture_start_time: self.start_time,
            ..CapturedAudio::default()
        };
        if !self.active {
            captured.position_secs = self.position_secs();
            return Ok(captured);
        }

        let shared_handle = Arc::clone(&self.shared);
        let mut shared = shared_handle.lock();
        let index = self.request.device_index;
        let device = shared
            .device_mut(index)
            .ok_or_else(|| AudioError::DeviceNotConnected(format!("virtual device #{} was removed", index)))?;

        if device.failing_reads {
            return Err(AudioError::Driver(format!("read from device #{} failed", index)));
        }
        let scripted = if device.asleep {
            Some(Vec::new())
        } else {
            device.script.pop_front()
        };
        let mut samples = match scripted {
            Some(chunk) => chunk,
            None => self.generate(&shared),
        };
        drop(shared);

        let ch = self.request.channels as usize;
        if let Some(capacity) = self.capture_frames {
            let frames = samples.len() / ch;
            if frames > capacity {
                samples.drain(..(frames - capacity) * ch);
                captured.overflow = true;
                self.xruns += 1;
            }
        }

        self.frames_delivered += samples.len() / ch;
        captured.position_secs = self.position_secs();
        captured.samples = samples;
        Ok(captured)
    }

    fn allocate_capture_buffer(&mut self, secs: f64) -> Result<(), AudioError> {
        self.ensure_open()?;
        self.capture_frames = Some((secs * self.request.sample_rate as f64) as usize);
        Ok(())
    }

    fn fill_buffer(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        self.ensure_open()?;
        if self.request.direction != StreamDirection::Playback {
            return Err(AudioError::Driver("not a playback stream".into()));
        }
        self.buffer = samples.to_vec();
        Ok(())
    }

    fn set_run_mode(&mut self, mode: RunMode) -> Result<(), AudioError> {
        self.ensure_open()?;
        self.run_mode = mode;
        Ok(())
    }

    fn latency_bias(&self) -> f64 {
        self.latency_bias
    }

    fn set_latency_bias(&mut self, secs: f64) -> Result<(), AudioError> {
        self.ensure_open()?;
        self.latency_bias = secs;
        Ok(())
    }

    fn status(&self) -> Option<StreamStatus> {
        if self.closed {
            return None;
        }
        Some(StreamStatus {
            active: self.active,
            sample_rate: self.request.sample_rate,
            start_time: self.start_time,
            capture_start_time: self.start_time,
            position_secs: self.position_secs(),
            recorded_secs: self.position_secs(),
            xruns: self.xruns,
            latency_bias: self.latency_bias,
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.active = false;

        let mut shared = self.shared.lock();
        if self.request.direction == StreamDirection::Playback {
            shared.playing.remove(&self.request.device_index);
        }
        shared.stats_mut(self.key()).closed += 1;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VirtualDevice;
    use crate::driver::VirtualDriver;
    use lab_audio_core::models::stream::LatencyClass;
    use lab_audio_core::traits::driver::AudioDriver;

    fn capture_request(channels: u16) -> StreamRequest {
        StreamRequest {
            device_index: 0,
            direction: StreamDirection::Capture,
            sample_rate: 1000,
            channels,
            latency_class: LatencyClass::LowLatency,
        }
    }

    fn driver() -> VirtualDriver {
        VirtualDriver::new().with_device(
            VirtualDevice::microphone(0, "Mic", 1000, 2)
                .with_level(0.25)
                .with_frames_per_read(10),
        )
    }

    #[test]
    fn idle_stream_reads_nothing() {
        let driver = driver();
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        assert!(stream.read_audio().unwrap().samples.is_empty());
    }

    #[test]
    fn script_comes_before_generated_signal() {
        let driver = driver();
        driver.push_chunk(0, vec![1.0, 1.0]);
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        stream.start(StartRequest::default()).unwrap();

        assert_eq!(stream.read_audio().unwrap().samples, vec![1.0, 1.0]);
        let generated = stream.read_audio().unwrap();
        assert_eq!(generated.samples.len(), 20);
        assert!(generated.samples.iter().all(|&s| s == 0.25));
        assert!((generated.position_secs - 0.011).abs() < 1e-9);
    }

    #[test]
    fn sleeping_device_delivers_nothing() {
        let driver = driver();
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        stream.start(StartRequest::default()).unwrap();
        driver.put_to_sleep(0);
        assert!(stream.read_audio().unwrap().samples.is_empty());
    }

    #[test]
    fn overflow_keeps_latest_frames() {
        let driver = driver();
        driver.set_frames_per_read(0, 50);
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        stream.allocate_capture_buffer(0.02).unwrap();
        stream.start(StartRequest::default()).unwrap();

        let captured = stream.read_audio().unwrap();
        assert!(captured.overflow);
        assert_eq!(captured.samples.len(), 40);
        assert_eq!(stream.status().unwrap().xruns, 1);
    }

    #[test]
    fn closed_stream_refuses_calls() {
        let driver = driver();
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        stream.close();
        stream.close();

        assert!(stream.is_closed());
        assert!(stream.status().is_none());
        assert!(stream.read_audio().is_err());
        assert_eq!(driver.stats(StreamKey::capture(0)).closed, 1);
    }

    #[test]
    fn removed_device_fails_reads() {
        let driver = driver();
        let mut stream = driver.open_stream(&capture_request(2)).unwrap();
        stream.start(StartRequest::default()).unwrap();
        driver.remove_device(0);
        assert!(matches!(stream.read_audio(), Err(AudioError::DeviceNotConnected(_))));
    }

    #[test]
    fn linked_speaker_is_heard() {
        let driver = driver().with_device(VirtualDevice::speaker(1, "Speakers", 1000, 1));
        driver.set_level(0, 0.0);
        driver.link(1, 0);

        let mut speaker = driver
            .open_stream(&StreamRequest {
                device_index: 1,
                direction: StreamDirection::Playback,
                sample_rate: 1000,
                channels: 1,
                latency_class: LatencyClass::LowLatency,
            })
            .unwrap();
        speaker.fill_buffer(&[0.5; 8]).unwrap();
        speaker.start(StartRequest::default()).unwrap();
        assert!(driver.is_playing(1));

        let mut mic = driver.open_stream(&capture_request(2)).unwrap();
        mic.start(StartRequest::default()).unwrap();
        assert!(mic.read_audio().unwrap().samples.iter().all(|&s| s == 0.5));

        speaker.stop(false, None).unwrap();
        assert!(!driver.is_playing(1));
        assert!(mic.read_audio().unwrap().samples.iter().all(|&s| s == 0.0));
    }
}
