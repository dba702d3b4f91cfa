use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::config::{AudioPreferences, Resampling, SpeakerConfig};
use crate::models::device::{AvailableDevice, DeviceDescriptor, DeviceSelector, StreamDirection};
use crate::models::error::AudioError;
use crate::models::stream::{LatencyClass, StartRequest, StopReport, StreamRequest, StreamStatus};
use crate::processing::audio_clip::AudioClip;
use crate::session::registry::{StreamHandle, StreamKey, StreamRegistry, StreamSetup};
use crate::session::selection;
use crate::traits::driver::AudioDriver;

/// Rates tried, in order, after the device's default rate is refused.
pub const FALLBACK_SAMPLE_RATES: [u32; 4] = [48000, 44100, 22050, 16000];

/// One physical playback device.
///
/// The playback stream is opened (or joined) on construction and kept
/// running with an empty buffer; [`play`](Self::play) loads a clip and
/// starts it. Speakers on the same index share one stream through the
/// registry.
pub struct SpeakerDevice {
    registry: Arc<StreamRegistry>,
    device: DeviceDescriptor,
    resampling: Resampling,
    exclusive: bool,
    latency_class: LatencyClass,
    stream: Option<Arc<StreamHandle>>,
}

impl SpeakerDevice {
    pub fn new(
        driver: Arc<dyn AudioDriver>,
        registry: Arc<StreamRegistry>,
        prefs: &AudioPreferences,
        config: SpeakerConfig,
    ) -> Result<Self, AudioError> {
        let mut index = config.index;
        let mut name = config.name.clone();
        if index.is_some() && name.is_some() {
            log::warn!("Both index and name provided for speaker device, index will be ignored");
            index = None;
        }

        let devices = selection::playback_devices(driver.as_ref(), prefs)?;

        if name.is_none() && index.map_or(true, |i| i == DeviceSelector::DEFAULT_INDEX) {
            let preferred = match prefs.preferred_output() {
                Some(preferred) => preferred.to_string(),
                None => devices
                    .first()
                    .ok_or_else(|| AudioError::DeviceNotConnected("no audio output devices found".into()))?
                    .name
                    .clone(),
            };
            name = Some(preferred);
        }

        let selector = match (name, index) {
            (Some(name), _) => DeviceSelector::Name(name),
            (None, Some(index)) => DeviceSelector::Index(index),
            (None, None) => DeviceSelector::Index(DeviceSelector::DEFAULT_INDEX),
        };
        let device = devices
            .iter()
            .find(|d| d.matches(&selector))
            .cloned()
            .ok_or_else(|| {
                AudioError::DeviceNotConnected(format!("no speaker device found with {}", selector))
            })?;

        let latency_class = match (config.resampling, config.exclusive) {
            (Resampling::Play, exclusive) => {
                if exclusive {
                    log::warn!("Exclusive mode is not available when the OS resamples; using shared mode");
                }
                LatencyClass::Shared
            }
            (_, true) => LatencyClass::Exclusive,
            (_, false) => LatencyClass::LowLatency,
        };

        let opener_driver = Arc::clone(&driver);
        let opener_device = device.clone();
        let handle = registry.acquire(StreamKey::playback(device.index), move || {
            open_with_fallback(opener_driver, &opener_device, latency_class)
        })?;

        let mut speaker = Self {
            registry,
            device,
            resampling: config.resampling,
            exclusive: config.exclusive,
            latency_class,
            stream: Some(handle),
        };
        speaker.open()?;
        Ok(speaker)
    }

    /// Playback devices visible under `prefs`.
    pub fn get_devices(
        driver: &dyn AudioDriver,
        prefs: &AudioPreferences,
    ) -> Result<Vec<DeviceDescriptor>, AudioError> {
        selection::playback_devices(driver, prefs)
    }

    /// Picker summaries of the playback devices visible under `prefs`.
    pub fn get_available_devices(
        driver: &dyn AudioDriver,
        prefs: &AudioPreferences,
    ) -> Result<Vec<AvailableDevice>, AudioError> {
        let devices = selection::playback_devices(driver, prefs)?;
        Ok(selection::available_playback_devices(&devices))
    }

    /// Whether the shared playback stream is running.
    pub fn is_open(&self) -> bool {
        self.status().is_some_and(|s| s.active)
    }

    /// Start the playback stream looping its (empty) buffer.
    pub fn open(&mut self) -> Result<(), AudioError> {
        if self.is_open() {
            return Ok(());
        }
        let handle = self.handle()?;
        handle.with_stream(|s| {
            s.start(StartRequest {
                repetitions: 0,
                when: None,
                wait_for_start: true,
                stop_time: None,
            })
        })?;
        Ok(())
    }

    /// Stop stream activity. The stream itself stays registered until the
    /// speaker is released.
    pub fn close(&mut self) -> Result<(), AudioError> {
        if !self.is_open() {
            return Ok(());
        }
        self.handle()?.with_stream(|s| s.stop(false, None))?;
        Ok(())
    }

    /// Give up this speaker's share of the playback stream.
    pub fn release(mut self) {
        if let Some(handle) = self.stream.take() {
            self.registry.release(&handle);
        }
    }

    /// Load `clip` into the stream and play it once. Returns the driver's
    /// start time.
    pub fn play(&mut self, clip: &AudioClip) -> Result<f64, AudioError> {
        let prepared = self.prepare(clip)?;
        let handle = self.handle()?;
        handle.with_stream(|s| {
            s.fill_buffer(prepared.samples())?;
            s.start(StartRequest {
                repetitions: 1,
                when: None,
                wait_for_start: false,
                stop_time: None,
            })
        })
    }

    pub fn stop_playback(&mut self) -> Result<StopReport, AudioError> {
        self.handle()?.with_stream(|s| s.stop(false, None))
    }

    /// Play a test tone for `duration`.
    pub fn test_device(&mut self, duration: Duration) -> Result<(), AudioError> {
        let tone = AudioClip::sine(
            super::microphone::TEST_TONE_HZ,
            duration.as_secs_f64(),
            self.sample_rate(),
            self.channels(),
        )?;
        self.play(&tone)?;
        thread::sleep(duration);
        self.stop_playback()?;
        Ok(())
    }

    /// Whether `selector` addresses this speaker's device.
    pub fn is_same_device(&self, selector: &DeviceSelector) -> bool {
        self.device.matches(selector)
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn index(&self) -> i32 {
        self.device.index
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Rate the playback stream was opened at.
    pub fn sample_rate(&self) -> u32 {
        self.stream
            .as_ref()
            .map_or(self.device.default_sample_rate, |h| h.sample_rate())
    }

    pub fn channels(&self) -> u16 {
        self.stream
            .as_ref()
            .map_or(self.device.output_channels, |h| h.channels())
    }

    pub fn latency_class(&self) -> LatencyClass {
        self.latency_class
    }

    pub fn resampling(&self) -> Resampling {
        self.resampling
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn status(&self) -> Option<StreamStatus> {
        self.stream.as_ref().and_then(|h| h.status())
    }

    fn handle(&self) -> Result<Arc<StreamHandle>, AudioError> {
        self.stream
            .as_ref()
            .filter(|h| !h.is_closed())
            .cloned()
            .ok_or(AudioError::StreamNotReady)
    }

    fn prepare(&self, clip: &AudioClip) -> Result<AudioClip, AudioError> {
        let rate = self.sample_rate();
        let converted = match self.resampling {
            Resampling::Load => clip.resampled(rate)?,
            Resampling::Play => clip.clone(),
            Resampling::None => {
                if clip.sample_rate() != rate {
                    return Err(AudioError::SampleRateMismatch {
                        clip: clip.sample_rate(),
                        device: rate,
                    });
                }
                clip.clone()
            }
        };
        converted.with_channels(self.channels())
    }
}

impl Drop for SpeakerDevice {
    fn drop(&mut self) {
        if let Some(handle) = self.stream.take() {
            self.registry.release(&handle);
        }
    }
}

impl std::fmt::Debug for SpeakerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerDevice")
            .field("device", &self.device)
            .field("resampling", &self.resampling)
            .field("latency_class", &self.latency_class)
            .finish_non_exhaustive()
    }
}

/// Open a playback stream at the device's default rate, falling back through
/// [`FALLBACK_SAMPLE_RATES`].
fn open_with_fallback(
    driver: Arc<dyn AudioDriver>,
    device: &DeviceDescriptor,
    latency_class: LatencyClass,
) -> Result<StreamHandle, AudioError> {
    let mut rates = vec![device.default_sample_rate];
    rates.extend(FALLBACK_SAMPLE_RATES.iter().filter(|&&r| r != device.default_sample_rate));

    for rate in rates {
        let request = StreamRequest {
            device_index: device.index,
            direction: StreamDirection::Playback,
            sample_rate: rate,
            channels: device.output_channels,
            latency_class,
        };
        match StreamHandle::open(Arc::clone(&driver), request, StreamSetup::default()) {
            Ok(handle) => {
                log::info!(
                    "Created stream for speaker device #{} ({}) at {} Hz",
                    device.index,
                    device.name,
                    rate
                );
                return Ok(handle);
            }
            Err(e) => log::debug!(
                "Failed to open speaker device #{} at {} Hz: {}",
                device.index,
                rate,
                e
            ),
        }
    }

    Err(AudioError::ConnectionError(format!(
        "failed to set up an audio stream for speaker device #{} ({})",
        device.index, device.name
    )))
}
