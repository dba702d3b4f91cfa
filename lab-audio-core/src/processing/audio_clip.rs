use std::f64::consts::PI;

use crate::models::error::AudioError;
use crate::processing::conversion;

/// Waveform of a generated test tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
}

/// Immutable block of interleaved f32 audio.
///
/// Slicing, merging and conversion always produce a new clip; the sample
/// storage of an existing clip is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidClip("sample rate must be positive".into()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidClip("channel count must be positive".into()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AudioError::InvalidClip(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// A clip of `frames` frames of silence.
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// Generate a test tone, identical on every channel.
    pub fn tone(
        waveform: Waveform,
        freq_hz: f64,
        duration_secs: f64,
        gain: f32,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioError> {
        if !(duration_secs >= 0.0) {
            return Err(AudioError::InvalidClip("duration must not be negative".into()));
        }
        let frames = (duration_secs * sample_rate as f64).round() as usize;
        let mono: Vec<f32> = (0..frames)
            .map(|i| {
                let phase = (i as f64 * freq_hz / sample_rate.max(1) as f64).fract();
                let value = match waveform {
                    Waveform::Sine => (2.0 * PI * phase).sin(),
                    Waveform::Square => {
                        if phase < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Waveform::Sawtooth => 2.0 * phase - 1.0,
                };
                value as f32 * gain
            })
            .collect();
        let samples = conversion::remap_channels(&mono, 1, channels as usize);
        Self::new(samples, sample_rate, channels)
    }

    /// Sine tone at `freq_hz` with gain 0.8.
    pub fn sine(freq_hz: f64, duration_secs: f64, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        Self::tone(Waveform::Sine, freq_hz, duration_secs, 0.8, sample_rate, channels)
    }

    /// Merge clips end to end, in order. All clips must share rate and layout.
    pub fn concatenate(clips: &[AudioClip]) -> Result<Self, AudioError> {
        let first = clips
            .first()
            .ok_or_else(|| AudioError::InvalidClip("nothing to concatenate".into()))?;

        let total: usize = clips.iter().map(|c| c.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for clip in clips {
            if clip.sample_rate != first.sample_rate || clip.channels != first.channels {
                return Err(AudioError::InvalidClip(format!(
                    "cannot join {} Hz/{} ch clip onto {} Hz/{} ch clip",
                    clip.sample_rate, clip.channels, first.sample_rate, first.channels
                )));
            }
            samples.extend_from_slice(&clip.samples);
        }
        Self::new(samples, first.sample_rate, first.channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Copy frames `[start, end)` into a new clip. Bounds are clamped.
    pub fn slice_frames(&self, start: usize, end: usize) -> Self {
        let frames = self.frames();
        let end = end.min(frames);
        let start = start.min(end);
        let ch = self.channels as usize;
        Self {
            samples: self.samples[start * ch..end * ch].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Copy the audio between two times in seconds; `end = None` runs to the
    /// end of the clip.
    pub fn segment(&self, start_secs: f64, end_secs: Option<f64>) -> Self {
        let start = self.frame_at(start_secs);
        let end = end_secs.map_or(self.frames(), |secs| self.frame_at(secs));
        self.slice_frames(start, end)
    }

    /// The last `frames` frames (or the whole clip if shorter).
    pub fn tail(&self, frames: usize) -> Self {
        let total = self.frames();
        self.slice_frames(total.saturating_sub(frames), total)
    }

    /// RMS over every sample of every channel.
    pub fn rms(&self) -> f32 {
        conversion::rms_level(&self.samples)
    }

    pub fn rms_per_channel(&self) -> Vec<f32> {
        conversion::rms_per_channel(&self.samples, self.channels as usize)
    }

    pub fn peak(&self) -> f32 {
        conversion::peak_level(&self.samples)
    }

    /// Convert to another channel layout.
    pub fn with_channels(&self, channels: u16) -> Result<Self, AudioError> {
        if channels == self.channels {
            return Ok(self.clone());
        }
        let samples = conversion::remap_channels(&self.samples, self.channels as usize, channels as usize);
        Self::new(samples, self.sample_rate, channels)
    }

    /// Resample to another rate using linear interpolation.
    pub fn resampled(&self, sample_rate: u32) -> Result<Self, AudioError> {
        if sample_rate == self.sample_rate {
            return Ok(self.clone());
        }
        let samples = conversion::resample_interleaved(
            &self.samples,
            self.channels as usize,
            self.sample_rate,
            sample_rate,
        );
        Self::new(samples, sample_rate, self.channels)
    }

    fn frame_at(&self, secs: f64) -> usize {
        if secs <= 0.0 {
            0
        } else {
            (secs * self.sample_rate as f64) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(frames: usize, channels: u16) -> AudioClip {
        let samples = (0..frames * channels as usize).map(|i| i as f32).collect();
        AudioClip::new(samples, 10, channels).unwrap()
    }

    #[test]
    fn rejects_ragged_samples() {
        assert!(AudioClip::new(vec![0.0; 3], 48000, 2).is_err());
        assert!(AudioClip::new(vec![0.0; 4], 0, 2).is_err());
        assert!(AudioClip::new(vec![0.0; 4], 48000, 0).is_err());
    }

    #[test]
    fn frames_and_duration() {
        let clip = ramp(20, 2);
        assert_eq!(clip.frames(), 20);
        assert_relative_eq!(clip.duration_secs(), 2.0);
    }

    #[test]
    fn slice_copies_whole_frames() {
        let clip = ramp(5, 2);
        let slice = clip.slice_frames(1, 3);
        assert_eq!(slice.samples(), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(slice.channels(), 2);
    }

    #[test]
    fn slice_clamps_out_of_range() {
        let clip = ramp(5, 1);
        assert_eq!(clip.slice_frames(3, 100).frames(), 2);
        assert!(clip.slice_frames(8, 2).is_empty());
    }

    #[test]
    fn segment_by_seconds() {
        let clip = ramp(30, 1); // 3 s at 10 Hz
        let seg = clip.segment(1.0, Some(2.0));
        assert_eq!(seg.frames(), 10);
        assert_eq!(seg.samples()[0], 10.0);

        assert_eq!(clip.segment(2.5, None).frames(), 5);
    }

    #[test]
    fn tail_returns_latest_frames() {
        let clip = ramp(10, 1);
        assert_eq!(clip.tail(3).samples(), &[7.0, 8.0, 9.0]);
        assert_eq!(clip.tail(50).frames(), 10);
    }

    #[test]
    fn concatenate_preserves_order() {
        let a = AudioClip::new(vec![1.0, 2.0], 10, 1).unwrap();
        let b = AudioClip::new(vec![3.0], 10, 1).unwrap();
        let c = AudioClip::new(vec![4.0, 5.0], 10, 1).unwrap();

        let merged = AudioClip::concatenate(&[a, b, c]).unwrap();
        assert_eq!(merged.samples(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn concatenate_rejects_mixed_formats() {
        let a = AudioClip::new(vec![1.0, 2.0], 10, 1).unwrap();
        let b = AudioClip::new(vec![3.0, 4.0], 10, 2).unwrap();
        assert!(AudioClip::concatenate(&[a, b]).is_err());
        assert!(AudioClip::concatenate(&[]).is_err());
    }

    #[test]
    fn sine_rms_matches_theory() {
        let clip = AudioClip::tone(Waveform::Sine, 100.0, 1.0, 1.0, 48000, 1).unwrap();
        assert_eq!(clip.frames(), 48000);
        assert_relative_eq!(clip.rms(), std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-3);
    }

    #[test]
    fn square_and_sawtooth_levels() {
        let square = AudioClip::tone(Waveform::Square, 50.0, 1.0, 0.5, 8000, 2).unwrap();
        assert_relative_eq!(square.rms(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(square.peak(), 0.5, epsilon = 1e-6);

        let saw = AudioClip::tone(Waveform::Sawtooth, 50.0, 1.0, 1.0, 8000, 1).unwrap();
        assert_relative_eq!(saw.rms(), 1.0 / 3f32.sqrt(), epsilon = 1e-2);
    }

    #[test]
    fn conversions_produce_new_layouts() {
        let mono = AudioClip::new(vec![0.0, 1.0], 24000, 1).unwrap();
        let stereo = mono.with_channels(2).unwrap();
        assert_eq!(stereo.samples(), &[0.0, 0.0, 1.0, 1.0]);

        let upsampled = stereo.resampled(48000).unwrap();
        assert_eq!(upsampled.frames(), 4);
        assert_eq!(upsampled.sample_rate(), 48000);
    }
}
