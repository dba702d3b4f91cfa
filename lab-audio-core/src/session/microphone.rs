use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::models::config::{AudioPreferences, MicrophoneConfig};
use crate::models::device::{AvailableDevice, DeviceDescriptor, DeviceSelector, StreamDirection};
use crate::models::error::AudioError;
use crate::models::message::{DeviceMessage, MicrophoneResponse};
use crate::models::policy::FillPolicy;
use crate::models::state::DeviceState;
use crate::models::stream::{LatencyClass, StartRequest, StopReport, StreamRequest, StreamStatus};
use crate::processing::audio_clip::AudioClip;
use crate::processing::conversion;
use crate::processing::recording_buffer::{frames_for_capacity, RecordingBuffer, BYTES_PER_SAMPLE};
use crate::session::registry::{StreamHandle, StreamKey, StreamRegistry, StreamSetup};
use crate::session::selection;
use crate::session::speaker::SpeakerDevice;
use crate::traits::driver::AudioDriver;
use crate::traits::listener::{DeviceListener, ListenerId};

/// Window used for the volume dispatched to listeners.
pub const DEFAULT_VOLUME_TIMEFRAME_SECS: f64 = 0.2;

/// Gain applied to RMS to get the reported volume.
pub const VOLUME_GAIN: f64 = 10.0;

/// Frequency of the tone used by device tests and speaker probing.
pub const TEST_TONE_HZ: f64 = 440.0;

/// Pause between polls while taking a volume reading.
const READING_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Records audio from one physical capture device.
///
/// Creating a microphone opens (or joins) the stream for its device right
/// away. Samples only accumulate between [`start`](Self::start) and
/// [`stop`](Self::stop), and only when [`poll`](Self::poll) is called: there
/// is no background thread, so the caller must poll more often than
/// `stream_buffer_secs` or the driver drops samples.
///
/// ```text
/// [driver stream] --poll--> [fragments] --get_recording--> [recording tape] --> AudioClip
/// ```
///
/// A started device that delivers nothing for `sleep_timeout_secs` is assumed
/// to have been suspended by the OS; the next poll reopens the stream and
/// restarts capture with an empty recording.
pub struct MicrophoneDevice {
    driver: Arc<dyn AudioDriver>,
    registry: Arc<StreamRegistry>,
    device: DeviceDescriptor,
    config: MicrophoneConfig,
    sample_rate: u32,
    channels: u16,
    latency_class: LatencyClass,
    stream: Option<Arc<StreamHandle>>,
    state: DeviceState,
    possibly_asleep: Option<Instant>,
    fragments: Vec<AudioClip>,
    total_frames: usize,
    limit_frames: Option<usize>,
    warned_full: bool,
    tape: RecordingBuffer,
    listeners: Vec<(ListenerId, Arc<dyn DeviceListener>)>,
    recoveries: u64,
}

impl MicrophoneDevice {
    /// Select a capture device according to `config` and open its stream.
    pub fn new(
        driver: Arc<dyn AudioDriver>,
        registry: Arc<StreamRegistry>,
        prefs: &AudioPreferences,
        config: MicrophoneConfig,
    ) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::InvalidConfiguration)?;

        let devices = selection::capture_devices(driver.as_ref(), prefs)?;
        let device = match config.device.as_ref().filter(|s| !s.is_default()) {
            Some(selector) => {
                selection::find_best_device(&devices, selector, config.sample_rate, config.channels)?
            }
            None => {
                let first = devices.first().ok_or_else(|| {
                    AudioError::DeviceNotConnected(
                        "could not choose default recording device as no recording devices are connected"
                            .into(),
                    )
                })?;
                if config.sample_rate.is_some() || config.channels.is_some() {
                    selection::find_best_device(
                        &devices,
                        &DeviceSelector::Index(first.index),
                        config.sample_rate,
                        config.channels,
                    )?
                } else {
                    first.clone()
                }
            }
        };

        Self::with_descriptor(driver, registry, device, config)
    }

    /// Open a microphone on an already selected device.
    pub fn with_descriptor(
        driver: Arc<dyn AudioDriver>,
        registry: Arc<StreamRegistry>,
        device: DeviceDescriptor,
        config: MicrophoneConfig,
    ) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::InvalidConfiguration)?;

        if !device.is_capture() {
            return Err(AudioError::InvalidCaptureDevice(format!(
                "device #{} ({}) has no input channels",
                device.index, device.name
            )));
        }

        log::info!(
            "Using audio device #{} ({}) for audio capture. Descriptor: {:?}",
            device.index,
            device.name,
            device
        );

        let channels = device.input_channels;
        if let Some(requested) = config.channels.filter(|&c| c != channels) {
            log::warn!(
                "Number of channels specified ({}) does not match the device's number of input channels ({})",
                requested,
                channels
            );
        }
        let sample_rate = device.default_sample_rate;
        if let Some(requested) = config.sample_rate.filter(|&r| r != sample_rate) {
            log::warn!(
                "Sample rate specified ({}) does not match the device's sample rate ({})",
                requested,
                sample_rate
            );
        }
        log::debug!(
            "Set recording channels to {} ({}), stream sample rate to {} Hz",
            channels,
            if channels > 1 { "stereo" } else { "mono" },
            sample_rate
        );

        let latency_class = if config.exclusive {
            LatencyClass::Exclusive
        } else {
            LatencyClass::LowLatency
        };

        let limit_frames = config
            .max_recording_size_kb
            .map(|kb| frames_for_capacity(kb, channels))
            .transpose()?;

        // Placeholder capacity, sized on open
        let tape = RecordingBuffer::new(sample_rate, channels, 0, config.policy_when_full)?;

        let mut mic = Self {
            driver,
            registry,
            device,
            config,
            sample_rate,
            channels,
            latency_class,
            stream: None,
            state: DeviceState::Closed,
            possibly_asleep: None,
            fragments: Vec::new(),
            total_frames: 0,
            limit_frames,
            warned_full: false,
            tape,
            listeners: Vec::new(),
            recoveries: 0,
        };
        mic.open()?;

        log::debug!("Audio capture device #{} ready", mic.device.index);
        Ok(mic)
    }

    /// Capture devices visible under `prefs`.
    pub fn get_devices(
        driver: &dyn AudioDriver,
        prefs: &AudioPreferences,
    ) -> Result<Vec<DeviceDescriptor>, AudioError> {
        selection::capture_devices(driver, prefs)
    }

    /// Picker summaries of the capture devices visible under `prefs`.
    pub fn get_available_devices(
        driver: &dyn AudioDriver,
        prefs: &AudioPreferences,
    ) -> Result<Vec<AvailableDevice>, AudioError> {
        let devices = selection::capture_devices(driver, prefs)?;
        Ok(selection::available_capture_devices(&devices))
    }

    // --- Stream lifecycle ---

    /// Open the stream, joining an existing healthy stream for this device.
    pub fn open(&mut self) -> Result<(), AudioError> {
        if let Some(handle) = &self.stream {
            if !handle.is_closed() {
                return Ok(());
            }
        }
        if let Some(dead) = self.stream.take() {
            self.registry.release(&dead);
        }

        if let Some(kb) = self.config.max_recording_size_kb {
            self.tape.allocate(kb)?;
        }
        self.state = DeviceState::Opening;

        let driver = Arc::clone(&self.driver);
        let request = self.stream_request();
        let setup = StreamSetup {
            run_mode: Some(self.config.run_mode),
            latency_bias: 0.0,
            capture_buffer_secs: Some(self.config.stream_buffer_secs),
        };
        let acquired = self
            .registry
            .acquire(StreamKey::capture(self.device.index), move || {
                StreamHandle::open(driver, request, setup)
            });

        match acquired {
            Ok(handle) => self.stream = Some(handle),
            Err(e) => {
                self.state = DeviceState::Closed;
                return Err(e);
            }
        }

        self.state = DeviceState::Idle;
        Ok(())
    }

    /// Detach listeners, stop recording and release the stream.
    pub fn close(&mut self) {
        self.clear_listeners();

        let Some(handle) = self.stream.take() else {
            return;
        };
        self.state = DeviceState::Closing;
        self.registry.release(&handle);
        self.state = DeviceState::Closed;
        log::debug!("Stream for device #{} closed", self.device.index);
    }

    /// Close and reopen the stream in place, restarting capture if it was
    /// running.
    pub fn reopen(&mut self) -> Result<(), AudioError> {
        let was_started = self.state.is_started();
        let begin = Instant::now();

        self.reopen_stream()?;
        log::info!(
            "Reopened microphone #{}, took {:.3}s",
            self.device.index,
            begin.elapsed().as_secs_f64()
        );

        if was_started {
            self.start_driver(None, false, None)?;
        }
        Ok(())
    }

    // --- Recording ---

    /// Start recording. Returns the driver's start time, or None if the
    /// microphone was already started.
    pub fn start(
        &mut self,
        when: Option<f64>,
        wait_for_start: bool,
        stop_time: Option<f64>,
    ) -> Result<Option<f64>, AudioError> {
        if self.state.is_started() {
            return Ok(None);
        }
        if self.live_stream().is_none() {
            return Err(AudioError::StreamNotReady);
        }

        self.possibly_asleep = None;
        self.fragments.clear();
        self.total_frames = 0;
        self.warned_full = false;

        self.start_driver(when, wait_for_start, stop_time).map(Some)
    }

    /// Alias of [`start`](Self::start).
    pub fn record(
        &mut self,
        when: Option<f64>,
        wait_for_start: bool,
        stop_time: Option<f64>,
    ) -> Result<Option<f64>, AudioError> {
        self.start(when, wait_for_start, stop_time)
    }

    /// Pull the samples captured since the last poll into the recording.
    ///
    /// Returns the number of frames received. Polling a microphone that is
    /// not started, closed, or mid-transition logs a warning and does
    /// nothing.
    pub fn poll(&mut self) -> Result<usize, AudioError> {
        if self.state.is_transitioning() {
            log::warn!(
                "Attempted to poll microphone while the stream was still {}. Samples will be lost.",
                self.state.as_str()
            );
            return Ok(0);
        }
        if !self.state.is_started() {
            log::warn!("Attempted to poll samples from mic which hasn't started.");
            return Ok(0);
        }

        let Some(handle) = self.live_stream() else {
            log::warn!("Attempted to poll samples from mic which has been closed.");
            return Ok(0);
        };

        let captured = match handle.with_stream(|s| s.read_audio()) {
            Ok(captured) => captured,
            Err(e) => {
                log::error!("Failed to read audio from device #{}: {}", self.device.index, e);
                return Ok(0);
            }
        };

        let ch = self.channels as usize;
        let frames = captured.samples.len() / ch;

        if frames > 0 {
            self.possibly_asleep = None;
        } else {
            match self.possibly_asleep {
                None => self.possibly_asleep = Some(Instant::now()),
                Some(since) if since.elapsed() >= self.sleep_timeout() => {
                    self.recover_from_sleep()?;
                }
                Some(_) => {}
            }
        }

        if captured.overflow {
            log::warn!(
                "Audio stream buffer overflow, some audio samples have been lost! Poll more often \
                 or increase the stream buffer (currently {} s).",
                self.config.stream_buffer_secs
            );
        }

        if frames > 0 {
            let mut samples = captured.samples;
            samples.truncate(frames * ch);
            self.fragments
                .push(AudioClip::new(samples, self.sample_rate, self.channels)?);
            self.total_frames += frames;
            self.enforce_recording_limit()?;
        }

        Ok(frames)
    }

    /// Stop recording after flushing any pending samples.
    ///
    /// Returns None if the microphone was not started or its stream is
    /// closed, so calling it twice is harmless.
    pub fn stop(
        &mut self,
        block_until_stopped: bool,
        stop_time: Option<f64>,
    ) -> Result<Option<StopReport>, AudioError> {
        if !self.state.is_started() {
            return Ok(None);
        }
        let Some(handle) = self.live_stream() else {
            self.state = DeviceState::Idle;
            return Ok(None);
        };

        let flushed = self.poll();

        let report = match handle.with_stream(|s| s.stop(block_until_stopped, stop_time)) {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!("Failed to stop device #{}: {}", self.device.index, e);
                None
            }
        };
        self.state = DeviceState::Idle;

        if let Some(report) = &report {
            log::debug!(
                "Device #{} stopped capturing audio samples at estimated time t={}. \
                 Total overruns: {} Total recording time: {}",
                self.device.index,
                report.estimated_stop_time,
                report.xruns,
                report.end_position_secs
            );
        }

        flushed?;
        Ok(report)
    }

    /// Alias of [`stop`](Self::stop).
    pub fn pause(
        &mut self,
        block_until_stopped: bool,
        stop_time: Option<f64>,
    ) -> Result<Option<StopReport>, AudioError> {
        self.stop(block_until_stopped, stop_time)
    }

    /// The recording made since the last start, stopping first if needed.
    /// None if nothing was captured.
    pub fn get_recording(&mut self) -> Result<Option<AudioClip>, AudioError> {
        if self.state.is_started() {
            log::warn!("Cannot get audio clip while recording is in progress, so stopping recording now.");
            self.stop(true, None)?;
        }
        self.merge_fragments()
    }

    /// A slice of the current recording between two times in seconds.
    pub fn get_segment(&mut self, start_secs: f64, end_secs: Option<f64>) -> Result<Option<AudioClip>, AudioError> {
        if self.merge_fragments()?.is_none() {
            return Ok(None);
        }
        self.tape.get_segment(start_secs, end_secs).map(Some)
    }

    /// Volume of the last `timeframe_secs` of audio: RMS × 10, rounded to
    /// three decimals. 0 when not recording or nothing was captured.
    pub fn get_current_volume(&mut self, timeframe_secs: f64) -> Result<f64, AudioError> {
        if !self.state.is_started() || self.live_stream().is_none() {
            return Ok(0.0);
        }

        self.poll()?;
        if self.fragments.is_empty() {
            return Ok(0.0);
        }

        let ch = self.channels as usize;
        let mut required = (timeframe_secs.max(0.0) * self.sample_rate as f64) as usize;
        let mut parts: Vec<&[f32]> = Vec::new();
        for fragment in self.fragments.iter().rev() {
            let frames = fragment.frames();
            if frames >= required {
                parts.push(&fragment.samples()[(frames - required) * ch..]);
                break;
            }
            required -= frames;
            parts.push(fragment.samples());
        }
        parts.reverse();

        let window = parts.concat();
        let rms = conversion::rms_level(&window) as f64 * VOLUME_GAIN;
        Ok((rms * 1000.0).round() / 1000.0)
    }

    /// Make a short recording, optionally while `speaker` plays a test tone.
    /// True if any audio was captured.
    pub fn test_device(&mut self, duration: Duration, speaker: Option<&mut SpeakerDevice>) -> Result<bool, AudioError> {
        let result = self.run_device_test(duration, speaker);
        if let Err(e) = &result {
            log::debug!("Microphone test failed. Error: {}", e);
        }
        result
    }

    /// Speakers from `candidates` that this microphone can hear.
    ///
    /// For each speaker, compares a volume reading of `reading` length taken
    /// in silence with one taken while the speaker plays a test tone. Speakers
    /// whose tone raises the volume by more than `threshold` are returned;
    /// speakers that cannot play are skipped.
    pub fn find_speakers(
        &mut self,
        candidates: impl IntoIterator<Item = SpeakerDevice>,
        threshold: f64,
        reading: Duration,
    ) -> Result<Vec<SpeakerDevice>, AudioError> {
        let mut found = Vec::new();
        for mut speaker in candidates {
            let tone = match AudioClip::sine(
                TEST_TONE_HZ,
                reading.as_secs_f64() * 2.0,
                speaker.sample_rate(),
                speaker.channels(),
            ) {
                Ok(tone) => tone,
                Err(e) => {
                    log::debug!("Skipping speaker #{}: {}", speaker.index(), e);
                    continue;
                }
            };

            let baseline = self.take_reading(reading)?;
            if let Err(e) = speaker.play(&tone) {
                log::debug!("Skipping speaker #{}: {}", speaker.index(), e);
                continue;
            }
            let active = self.take_reading(reading);
            if let Err(e) = speaker.stop_playback() {
                log::debug!("Failed to stop tone on speaker #{}: {}", speaker.index(), e);
            }
            let active = active?;

            log::debug!(
                "Speaker #{} volume: baseline {:.3}, active {:.3}",
                speaker.index(),
                baseline,
                active
            );
            if active - baseline > threshold {
                found.push(speaker);
            }
        }
        Ok(found)
    }

    // --- Listeners ---

    /// Attach a listener. With `start`, recording begins immediately.
    pub fn add_listener(&mut self, listener: Arc<dyn DeviceListener>, start: bool) -> Result<ListenerId, AudioError> {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        if start {
            self.start(None, false, None)?;
        }
        Ok(id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Detach every listener and stop recording.
    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
        if let Err(e) = self.stop(true, None) {
            log::error!("Failed to stop device #{} while clearing listeners: {}", self.device.index, e);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Send the current volume to every listener. With `clear`, the recording
    /// so far is discarded afterwards. None if not recording.
    pub fn dispatch_messages(&mut self, clear: bool) -> Result<Option<DeviceMessage>, AudioError> {
        if !self.state.is_started() {
            return Ok(None);
        }

        self.poll()?;
        let volume = self.get_current_volume(DEFAULT_VOLUME_TIMEFRAME_SECS)?;
        let message = DeviceMessage::Microphone(MicrophoneResponse {
            timestamp: Utc::now(),
            volume,
            device_index: self.device.index,
            device_name: self.device.name.clone(),
        });
        self.notify(&message);

        if clear {
            self.fragments.clear();
            self.total_frames = 0;
        }
        Ok(Some(message))
    }

    // --- Properties ---

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn index(&self) -> i32 {
        self.device.index
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    /// Alias of [`is_started`](Self::is_started).
    pub fn is_recording(&self) -> bool {
        self.is_started()
    }

    pub fn latency_class(&self) -> LatencyClass {
        self.latency_class
    }

    pub fn stream_buffer_secs(&self) -> f64 {
        self.config.stream_buffer_secs
    }

    /// Driver status of the stream, or None if it is closed.
    pub fn stream_status(&self) -> Option<StreamStatus> {
        self.live_stream().and_then(|h| h.status())
    }

    pub fn latency_bias(&self) -> Option<f64> {
        self.live_stream().map(|h| h.with_stream(|s| s.latency_bias()))
    }

    pub fn set_latency_bias(&mut self, secs: f64) -> Result<(), AudioError> {
        let handle = self.live_stream().ok_or(AudioError::StreamNotReady)?;
        handle.with_stream(|s| s.set_latency_bias(secs))
    }

    /// Whether `selector` addresses this microphone's device.
    pub fn is_same_device(&self, selector: &DeviceSelector) -> bool {
        self.device.matches(selector)
    }

    /// Fragments captured since the last start, in arrival order.
    pub fn fragments(&self) -> &[AudioClip] {
        &self.fragments
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn recording_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Whether the recording has reached the max recording size.
    pub fn recording_full(&self) -> bool {
        self.limit_frames
            .map_or(false, |limit| self.total_frames >= limit)
    }

    /// Seconds of audio recorded since the last start.
    pub fn recording_secs(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }

    pub fn max_recording_size_kb(&self) -> Option<u64> {
        self.config.max_recording_size_kb
    }

    /// Change the recording limit. A new limit reallocates the recording tape.
    pub fn set_max_recording_size_kb(&mut self, kb: Option<u64>) -> Result<(), AudioError> {
        if kb == Some(0) {
            return Err(AudioError::InvalidConfiguration("max recording size must be positive".into()));
        }
        let limit_frames = kb.map(|kb| frames_for_capacity(kb, self.channels)).transpose()?;
        if let Some(kb) = kb {
            self.tape.allocate(kb)?;
        }
        self.config.max_recording_size_kb = kb;
        self.limit_frames = limit_frames;
        Ok(())
    }

    pub fn policy_when_full(&self) -> FillPolicy {
        self.config.policy_when_full
    }

    pub fn set_policy_when_full(&mut self, policy: FillPolicy) {
        self.config.policy_when_full = policy;
    }

    pub fn sleep_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.sleep_timeout_secs)
    }

    pub fn set_sleep_timeout(&mut self, timeout: Duration) {
        self.config.sleep_timeout_secs = timeout.as_secs_f64();
    }

    /// Number of times a sleeping device was reopened.
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// The buffer recordings are assembled on.
    pub fn recording_tape(&self) -> &RecordingBuffer {
        &self.tape
    }

    // --- Internal helpers ---

    fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            device_index: self.device.index,
            direction: StreamDirection::Capture,
            sample_rate: self.sample_rate,
            channels: self.channels,
            latency_class: self.latency_class,
        }
    }

    fn live_stream(&self) -> Option<Arc<StreamHandle>> {
        self.stream.as_ref().filter(|h| !h.is_closed()).cloned()
    }

    fn start_driver(
        &mut self,
        when: Option<f64>,
        wait_for_start: bool,
        stop_time: Option<f64>,
    ) -> Result<f64, AudioError> {
        let handle = self.live_stream().ok_or(AudioError::StreamNotReady)?;
        let start_time = handle.with_stream(|s| {
            s.start(StartRequest {
                repetitions: 0,
                when,
                wait_for_start,
                stop_time,
            })
        })?;
        self.state = DeviceState::Started;

        log::debug!(
            "Scheduled start of audio capture for device #{} at t={}",
            self.device.index,
            start_time
        );
        Ok(start_time)
    }

    fn reopen_stream(&mut self) -> Result<(), AudioError> {
        let Some(handle) = self.stream.clone() else {
            return self.open();
        };

        self.state = DeviceState::Closing;
        let reopened = handle.reopen();
        self.state = if reopened.is_ok() {
            DeviceState::Idle
        } else {
            DeviceState::Closed
        };
        reopened
    }

    fn recover_from_sleep(&mut self) -> Result<(), AudioError> {
        log::error!(
            "Microphone device #{} appears to have gone to sleep, reopening to wake it up.",
            self.device.index
        );

        // Mark stopped first so nothing polls the dead stream
        self.state = DeviceState::Idle;
        let begin = Instant::now();
        self.reopen_stream()?;

        // Audio from before the gap would no longer line up with stream time
        self.fragments.clear();
        self.total_frames = 0;
        self.warned_full = false;

        self.start_driver(None, false, None)?;
        self.possibly_asleep = None;
        self.recoveries += 1;

        log::info!(
            "Reopened microphone #{}, took {:.3}s",
            self.device.index,
            begin.elapsed().as_secs_f64()
        );
        self.notify(&DeviceMessage::DeviceRecovered {
            timestamp: Utc::now(),
            device_index: self.device.index,
        });
        Ok(())
    }

    /// Apply the fill policy once the recording reaches the size limit.
    ///
    /// Only rolling changes the fragments; otherwise the recording tape caps
    /// the merged recording at the limit.
    fn enforce_recording_limit(&mut self) -> Result<(), AudioError> {
        let Some(limit) = self.limit_frames else {
            return Ok(());
        };
        if self.total_frames < limit {
            return Ok(());
        }

        match self.config.policy_when_full {
            FillPolicy::Ignore => {}
            FillPolicy::Warn => {
                if !self.warned_full {
                    log::warn!("Recording buffer is full, no more samples will be added.");
                    self.warned_full = true;
                }
            }
            FillPolicy::Error => return Err(AudioError::RecordingBufferFull),
            FillPolicy::Roll => {
                let excess = self.total_frames - limit;
                if excess > 0 && !self.warned_full {
                    log::warn!(
                        "Microphone buffer reached, as policy when full is 'roll' the oldest samples \
                         will be cleared to make room for new samples."
                    );
                    self.warned_full = true;
                }
                self.discard_oldest(excess);
            }
        }
        Ok(())
    }

    fn discard_oldest(&mut self, mut frames: usize) {
        let mut drained = 0;
        for fragment in &self.fragments {
            if fragment.frames() > frames {
                break;
            }
            frames -= fragment.frames();
            self.total_frames -= fragment.frames();
            drained += 1;
        }
        self.fragments.drain(..drained);

        if frames > 0 {
            if let Some(first) = self.fragments.first_mut() {
                *first = first.slice_frames(frames, first.frames());
                self.total_frames -= frames;
            }
        }
    }

    /// Assemble the fragments on the recording tape and replace them with
    /// the single merged clip.
    fn merge_fragments(&mut self) -> Result<Option<AudioClip>, AudioError> {
        if self.fragments.is_empty() {
            return Ok(None);
        }

        let needed = self.total_frames;
        if self.config.max_recording_size_kb.is_none() && self.tape.total_frames() < needed {
            let bytes = needed * self.channels as usize * BYTES_PER_SAMPLE;
            self.tape.allocate(bytes.div_ceil(1000) as u64)?;
        }

        // Polling already reported a full recording; the tape only truncates
        self.tape.set_policy(match self.config.policy_when_full {
            FillPolicy::Roll => FillPolicy::Roll,
            _ => FillPolicy::Ignore,
        });
        self.tape.clear();
        for fragment in &self.fragments {
            self.tape.write(fragment.samples())?;
        }

        let merged = self.tape.get_segment(0.0, None)?;
        self.total_frames = merged.frames();
        self.fragments = vec![merged.clone()];
        Ok(Some(merged))
    }

    fn take_reading(&mut self, duration: Duration) -> Result<f64, AudioError> {
        self.start(None, false, None)?;
        let volume = self.measure_volume(duration);
        let stopped = self.stop(true, None);
        let volume = volume?;
        stopped?;
        Ok(volume)
    }

    fn measure_volume(&mut self, duration: Duration) -> Result<f64, AudioError> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.poll()?;
            thread::sleep(READING_POLL_INTERVAL);
        }
        self.get_current_volume(duration.as_secs_f64())
    }

    fn run_device_test(&mut self, duration: Duration, speaker: Option<&mut SpeakerDevice>) -> Result<bool, AudioError> {
        let playback = match speaker {
            Some(speaker) => {
                let tone = AudioClip::sine(
                    TEST_TONE_HZ,
                    duration.as_secs_f64(),
                    speaker.sample_rate(),
                    speaker.channels(),
                )?;
                Some((speaker, tone))
            }
            None => None,
        };

        self.start(None, false, None)?;
        let captured = self.capture_test_clip(duration, playback);
        if self.state.is_started() {
            if let Err(e) = self.stop(true, None) {
                log::debug!("Failed to stop microphone #{} after test: {}", self.device.index, e);
            }
        }
        captured
    }

    /// Record for `duration`, playing the tone if given. The tone is always
    /// stopped before returning.
    fn capture_test_clip(
        &mut self,
        duration: Duration,
        playback: Option<(&mut SpeakerDevice, AudioClip)>,
    ) -> Result<bool, AudioError> {
        let Some((speaker, tone)) = playback else {
            thread::sleep(duration);
            let clip = self.poll().and_then(|_| self.get_recording())?;
            return Ok(clip.is_some_and(|c| !c.is_empty()));
        };

        speaker.play(&tone)?;
        thread::sleep(duration);
        let clip = self.poll().and_then(|_| self.get_recording());
        let stopped = speaker.stop_playback();
        let clip = clip?;
        stopped?;
        Ok(clip.is_some_and(|c| !c.is_empty()))
    }

    fn notify(&self, message: &DeviceMessage) {
        for (_, listener) in &self.listeners {
            listener.receive_message(message);
        }
    }
}

impl Drop for MicrophoneDevice {
    fn drop(&mut self) {
        if let Some(handle) = self.stream.take() {
            self.registry.release(&handle);
        }
    }
}

impl std::fmt::Debug for MicrophoneDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrophoneDevice")
            .field("device", &self.device)
            .field("state", &self.state)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("total_frames", &self.total_frames)
            .finish_non_exhaustive()
    }
}
