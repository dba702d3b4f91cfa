//! Pure-math helpers on interleaved f32 buffers: level metering, channel
//! remapping and linear-interpolation resampling.

/// RMS level of samples (0.0–1.0 for normalized audio).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// RMS level of each channel of an interleaved buffer.
pub fn rms_per_channel(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    if frames == 0 {
        return vec![0.0; channels];
    }
    let mut sums = vec![0.0f64; channels];
    for frame in samples.chunks_exact(channels) {
        for (sum, &s) in sums.iter_mut().zip(frame) {
            *sum += (s as f64) * (s as f64);
        }
    }
    sums.into_iter()
        .map(|sum| (sum / frames as f64).sqrt() as f32)
        .collect()
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Convert interleaved audio between channel layouts.
///
/// Mono is copied into every output channel, anything to mono is averaged,
/// other layouts keep the shared channels and zero-fill the rest.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    if to == 1 {
        return downmix_to_mono(samples, from);
    }

    let frames = samples.len() / from;
    let mut output = vec![0.0f32; frames * to];
    for (frame, out) in samples.chunks_exact(from).zip(output.chunks_exact_mut(to)) {
        if from == 1 {
            out.fill(frame[0]);
        } else {
            let shared = from.min(to);
            out[..shared].copy_from_slice(&frame[..shared]);
        }
    }
    output
}

/// Linear interpolation resampling for interleaved audio with any channel count.
///
/// Returns input unchanged if rates match.
pub fn resample_interleaved(samples: &[f32], channels: usize, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || channels == 0 || source_rate == 0 {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let ratio = target_rate as f64 / source_rate as f64;
    let output_frames = (frame_count as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            output[i * channels + ch] = if index + 1 < frame_count {
                samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction
            } else if index < frame_count {
                samples[index * channels + ch]
            } else {
                0.0
            };
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_level_silence() {
        assert_eq!(rms_level(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(rms_level(&[]), 0.0);
    }

    #[test]
    fn rms_level_full_scale() {
        assert_relative_eq!(rms_level(&[1.0, -1.0, 1.0]), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn peak_level_basic() {
        assert_relative_eq!(peak_level(&[0.1, -0.5, 0.3]), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn rms_per_channel_separates_channels() {
        let levels = rms_per_channel(&[1.0, 0.0, -1.0, 0.0], 2);
        assert_eq!(levels.len(), 2);
        assert_relative_eq!(levels[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(levels[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn downmix_stereo_to_mono() {
        let mono = downmix_to_mono(&[0.2, 0.8, 0.4, 0.6], 2);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mono[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn remap_mono_to_stereo_duplicates() {
        assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn remap_quad_to_stereo_keeps_front_pair() {
        let quad = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(remap_channels(&quad, 4, 2), vec![1.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(resample_interleaved(&samples, 1, 48000, 48000), samples);
    }

    #[test]
    fn resample_upsample_2x() {
        let result = resample_interleaved(&[0.0, 1.0], 1, 24000, 48000);
        assert_eq!(result.len(), 4);
        assert_relative_eq!(result[0], 0.0, epsilon = 0.01);
        assert_relative_eq!(result[1], 0.5, epsilon = 0.01);
    }

    #[test]
    fn resample_stereo_downsample() {
        let samples: Vec<f32> = (0..200).map(|i| (i / 2) as f32).collect();
        let result = resample_interleaved(&samples, 2, 48000, 24000);
        assert_eq!(result.len(), 100);
        // channels stay paired
        assert_eq!(result[2], result[3]);
    }
}
