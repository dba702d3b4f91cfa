use crate::models::error::AudioError;
use crate::models::policy::FillPolicy;
use crate::processing::audio_clip::AudioClip;

/// Size of one stored sample in bytes (f32).
pub const BYTES_PER_SAMPLE: usize = 4;

/// Capacity used when the owner does not set one (64 MB).
pub const DEFAULT_CAPACITY_KB: u64 = 64_000;

/// Number of frames a buffer of `capacity_kb` kilobytes holds.
///
/// Fails when the byte count does not fit in `usize` on this target.
pub fn frames_for_capacity(capacity_kb: u64, channels: u16) -> Result<usize, AudioError> {
    let bytes = usize::try_from(capacity_kb)
        .ok()
        .and_then(|kb| kb.checked_mul(1000))
        .ok_or_else(|| {
            AudioError::InvalidConfiguration(format!("capacity of {} kB is too large", capacity_kb))
        })?;
    Ok(bytes / (channels.max(1) as usize * BYTES_PER_SAMPLE))
}

/// Fixed-capacity recording store with a fill policy.
///
/// Think of it as the tape a recording is written onto: frames are appended
/// at the write offset until the tape runs out, after which the fill policy
/// decides whether new frames are dropped, refused, or roll the oldest ones
/// off the front.
///
/// Capacity is set in kilobytes and converted into a frame count. The frame
/// array is allocated once per capacity and replaced wholesale when the
/// capacity changes or the buffer is cleared.
///
/// Invariant: `write_offset() + space_remaining() == total_frames()`.
#[derive(Debug)]
pub struct RecordingBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    capacity_kb: u64,
    total_frames: usize,
    offset: usize,
    last_sample: usize,
    space_remaining: usize,
    policy: FillPolicy,
    warned_full: bool,
    loops: u64,
}

impl RecordingBuffer {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        capacity_kb: u64,
        policy: FillPolicy,
    ) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidConfiguration("sample rate must be positive".into()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidConfiguration("channel count must be positive".into()));
        }

        let mut buffer = Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            capacity_kb,
            total_frames: 0,
            offset: 0,
            last_sample: 0,
            space_remaining: 0,
            policy,
            warned_full: false,
            loops: 0,
        };
        buffer.reallocate(frames_for_capacity(capacity_kb, channels)?);
        Ok(buffer)
    }

    /// Set the capacity in kilobytes. Same capacity is a no-op; a different
    /// one discards all recorded frames. A capacity too large to address
    /// leaves the buffer untouched.
    pub fn allocate(&mut self, capacity_kb: u64) -> Result<(), AudioError> {
        if capacity_kb == self.capacity_kb {
            return Ok(());
        }
        let frames = frames_for_capacity(capacity_kb, self.channels)?;
        self.capacity_kb = capacity_kb;
        self.reallocate(frames);
        Ok(())
    }

    /// Move the write offset. Relative offsets are added to the current one.
    pub fn seek(&mut self, offset: i64, absolute: bool) -> Result<(), AudioError> {
        let target = if absolute {
            offset
        } else {
            self.offset as i64 + offset
        };
        if target < 0 || target >= self.total_frames as i64 {
            return Err(AudioError::OutOfRange {
                offset: target,
                capacity: self.total_frames,
            });
        }

        self.offset = target as usize;
        self.space_remaining = self.total_frames - self.offset;
        Ok(())
    }

    /// Append interleaved frames at the write offset.
    ///
    /// Returns the number of frames that did not fit (0 if all were stored).
    pub fn write(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
        let ch = self.channels as usize;
        if samples.len() % ch != 0 {
            return Err(AudioError::InvalidClip(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                ch
            )));
        }

        let mut incoming = samples;
        let mut dropped = 0;

        if self.is_full() {
            match self.policy {
                FillPolicy::Warn => {
                    if !self.warned_full {
                        log::warn!(
                            "Audio recording buffer filled! No samples are saved beyond {:.6} seconds. \
                             Use a larger recording buffer to avoid data loss.",
                            self.buffer_secs()
                        );
                        self.warned_full = true;
                    }
                    return Ok(incoming.len() / ch);
                }
                FillPolicy::Ignore => return Ok(incoming.len() / ch),
                FillPolicy::Error => return Err(AudioError::RecordingBufferFull),
                FillPolicy::Roll => {}
            }
        }

        let n_frames = incoming.len() / ch;
        if n_frames == 0 {
            return Ok(0);
        }

        if self.policy == FillPolicy::Roll && n_frames > self.space_remaining {
            if n_frames > self.total_frames {
                dropped = n_frames - self.total_frames;
                incoming = &incoming[dropped * ch..];
            }
            let needed = (incoming.len() / ch).saturating_sub(self.space_remaining);
            self.roll(needed);
        }

        let n_frames = incoming.len() / ch;
        let to_write = n_frames.min(self.space_remaining);
        let start = self.offset * ch;
        self.samples[start..start + to_write * ch].copy_from_slice(&incoming[..to_write * ch]);

        self.offset += to_write;
        self.last_sample = self.offset;
        self.space_remaining -= to_write;

        Ok(dropped + (n_frames - to_write))
    }

    /// Discard everything and reallocate at the current capacity.
    pub fn clear(&mut self) {
        self.reallocate(self.total_frames);
    }

    /// Copy recorded audio between two times into a new clip. `end = None`
    /// means up to the last written frame.
    pub fn get_segment(&self, start_secs: f64, end_secs: Option<f64>) -> Result<AudioClip, AudioError> {
        if self.last_sample == 0 {
            return Err(AudioError::StreamError(
                "could not access recording as the buffer holds no samples".into(),
            ));
        }

        let start = self.frame_at(start_secs);
        let end = end_secs.map_or(self.last_sample, |secs| self.frame_at(secs).min(self.last_sample));
        let start = start.min(end);

        let ch = self.channels as usize;
        AudioClip::new(
            self.samples[start * ch..end * ch].to_vec(),
            self.sample_rate,
            self.channels,
        )
    }

    /// The whole frame array, including space not yet written.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Capacity of the buffer in seconds.
    pub fn buffer_secs(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }

    /// Bytes occupied by the frame array.
    pub fn nbytes(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE
    }

    pub fn sample_bytes(&self) -> usize {
        BYTES_PER_SAMPLE
    }

    pub fn space_remaining(&self) -> usize {
        self.space_remaining
    }

    pub fn is_full(&self) -> bool {
        self.space_remaining == 0
    }

    /// Total number of frames the buffer can hold.
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn write_offset(&self) -> usize {
        self.offset
    }

    /// Index one past the last recorded frame.
    pub fn last_sample(&self) -> usize {
        self.last_sample
    }

    /// Number of times old frames were rolled off under `FillPolicy::Roll`.
    pub fn loop_count(&self) -> u64 {
        self.loops
    }

    pub fn capacity_kb(&self) -> u64 {
        self.capacity_kb
    }

    pub fn policy(&self) -> FillPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FillPolicy) {
        self.policy = policy;
    }

    /// Whether the fill warning (or roll notice) has fired since the last clear.
    pub fn warned_full(&self) -> bool {
        self.warned_full
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    // --- Internal helpers ---

    fn reallocate(&mut self, total_frames: usize) {
        self.total_frames = total_frames;
        self.samples = vec![0.0; self.total_frames * self.channels as usize];
        self.offset = 0;
        self.last_sample = 0;
        self.space_remaining = self.total_frames;
        self.warned_full = false;
        self.loops = 0;
    }

    /// Shift the recorded frames left by `frames`, freeing room at the end.
    fn roll(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        if !self.warned_full {
            log::warn!(
                "Recording buffer full; policy is 'roll' so the oldest samples are discarded to make room."
            );
            self.warned_full = true;
        }

        let ch = self.channels as usize;
        let frames = frames.min(self.offset);
        self.samples.copy_within(frames * ch..self.offset * ch, 0);
        self.offset -= frames;
        self.last_sample = self.offset;
        self.space_remaining += frames;
        self.loops += 1;
    }

    fn frame_at(&self, secs: f64) -> usize {
        if secs <= 0.0 {
            0
        } else {
            (secs * self.sample_rate as f64) as usize
        }
    }
}
