use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::device::DeviceSelector;
use super::error::AudioError;
use super::policy::FillPolicy;
use super::stream::RunMode;

/// Configuration for a microphone session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrophoneConfig {
    /// Device to record from, or None for the first capture device.
    pub device: Option<DeviceSelector>,

    /// Requested sample rate in Hz. The device default wins when they differ.
    pub sample_rate: Option<u32>,

    /// Requested channel count. The device default wins when they differ.
    pub channels: Option<u16>,

    /// Seconds of audio the driver buffers between polls (default: 2.0).
    pub stream_buffer_secs: f64,

    /// Maximum recording size in kilobytes (None = unlimited).
    pub max_recording_size_kb: Option<u64>,

    /// What to do when the recording reaches `max_recording_size_kb`.
    pub policy_when_full: FillPolicy,

    /// Take exclusive control of the device.
    pub exclusive: bool,

    pub run_mode: RunMode,

    /// Seconds without samples before a started device is considered asleep
    /// and reopened (default: 1.0).
    pub sleep_timeout_secs: f64,
}

impl MicrophoneConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stream_buffer_secs > 0.0) {
            return Err("stream buffer must be a positive number of seconds".into());
        }
        if self.sample_rate == Some(0) {
            return Err("sample rate must be positive".into());
        }
        if self.channels == Some(0) {
            return Err("channel count must be positive".into());
        }
        if self.max_recording_size_kb == Some(0) {
            return Err("max recording size must be positive".into());
        }
        if !(self.sleep_timeout_secs > 0.0) {
            return Err("sleep timeout must be positive".into());
        }
        Ok(())
    }
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: None,
            channels: None,
            stream_buffer_secs: 2.0,
            max_recording_size_kb: None,
            policy_when_full: FillPolicy::Warn,
            exclusive: false,
            run_mode: RunMode::Hot,
            sleep_timeout_secs: 1.0,
        }
    }
}

/// Where clips are resampled to the speaker's rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// The OS resamples on playback. Not suitable for low latency.
    Play,
    /// Clips are resampled before they reach the stream.
    #[default]
    Load,
    /// No resampling; clips must already match the speaker rate.
    None,
}

/// Configuration for a speaker device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Driver index of the speaker. Ignored when `name` is also set.
    pub index: Option<i32>,
    pub name: Option<String>,
    pub resampling: Resampling,
    pub exclusive: bool,
}

/// Host preferences the device layer reads but never writes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPreferences {
    /// On Windows, only consider WASAPI devices.
    pub force_wasapi_only: bool,

    /// Name of the preferred output device; None or "default" picks the
    /// first available speaker.
    pub default_output_device: Option<String>,
}

impl AudioPreferences {
    /// Read preferences from a JSON file.
    pub fn load(path: &Path) -> Result<Self, AudioError> {
        let json = fs::read_to_string(path).map_err(|e| {
            AudioError::InvalidConfiguration(format!("failed to read preferences: {}", e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, AudioError> {
        serde_json::from_str(json).map_err(|e| {
            AudioError::InvalidConfiguration(format!("failed to parse preferences: {}", e))
        })
    }

    /// The preferred output device name, if one is set.
    pub fn preferred_output(&self) -> Option<&str> {
        self.default_output_device
            .as_deref()
            .filter(|name| !matches!(*name, "default" | "None" | ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_microphone_config_is_valid() {
        let config = MicrophoneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy_when_full, FillPolicy::Warn);
        assert_eq!(config.run_mode, RunMode::Hot);
    }

    #[test]
    fn rejects_bad_values() {
        let config = MicrophoneConfig {
            stream_buffer_secs: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MicrophoneConfig {
            channels: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MicrophoneConfig {
            sleep_timeout_secs: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn microphone_config_from_partial_json() {
        let config: MicrophoneConfig = serde_json::from_str(
            r#"{"device": "Headset Mic", "policy_when_full": "rolling", "max_recording_size_kb": 500}"#,
        )
        .unwrap();
        assert_eq!(config.device, Some(DeviceSelector::Name("Headset Mic".into())));
        assert_eq!(config.policy_when_full, FillPolicy::Roll);
        assert_eq!(config.max_recording_size_kb, Some(500));
        assert_eq!(config.stream_buffer_secs, 2.0);
    }

    #[test]
    fn preferences_treat_default_as_unset() {
        let prefs = AudioPreferences::from_json(r#"{"default_output_device": "default"}"#).unwrap();
        assert_eq!(prefs.preferred_output(), None);
        assert!(!prefs.force_wasapi_only);

        let prefs = AudioPreferences::from_json(r#"{"default_output_device": "Speakers"}"#).unwrap();
        assert_eq!(prefs.preferred_output(), Some("Speakers"));
    }

    #[test]
    fn load_preferences_from_file() {
        let path = std::env::temp_dir().join(format!("lab_audio_prefs_{}.json", std::process::id()));
        fs::write(&path, r#"{"force_wasapi_only": true}"#).unwrap();

        let prefs = AudioPreferences::load(&path).unwrap();
        assert!(prefs.force_wasapi_only);

        fs::remove_file(&path).ok();
        assert!(AudioPreferences::load(&path).is_err());
    }
}
