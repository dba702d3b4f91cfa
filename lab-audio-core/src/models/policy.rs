use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// What to do with incoming samples once a bounded recording is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Drop new samples silently.
    Ignore,
    /// Drop new samples and log a warning once per fill episode.
    #[default]
    #[serde(alias = "warning")]
    Warn,
    /// Refuse new samples with `AudioError::RecordingBufferFull`.
    Error,
    /// Discard the oldest samples to make room for new ones.
    #[serde(alias = "rolling")]
    Roll,
}

impl FillPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Roll => "roll",
        }
    }
}

impl fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FillPolicy {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "roll" | "rolling" => Ok(Self::Roll),
            other => Err(AudioError::InvalidConfiguration(format!(
                "unknown fill policy: {}",
                other
            ))),
        }
    }
}
