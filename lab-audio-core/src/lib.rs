//! # lab-audio-core
//!
//! Driver-agnostic audio device layer for experiment software.
//!
//! Provides the recording buffer, audio clips, device selection, the
//! process-wide stream registry, and the microphone and speaker sessions.
//! Audio backends implement the `AudioDriver` and `DriverStream` traits and
//! plug into the sessions.
//!
//! ## Architecture
//!
//! ```text
//! lab-audio-core (this crate)
//! ├── traits/       ← AudioDriver, DriverStream, DeviceListener
//! ├── models/       ← AudioError, FillPolicy, DeviceDescriptor, configs, messages
//! ├── processing/   ← RecordingBuffer, AudioClip, level and format conversion
//! └── session/      ← MicrophoneDevice, SpeakerDevice, StreamRegistry, selection
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{AudioPreferences, MicrophoneConfig, Resampling, SpeakerConfig};
pub use models::device::{AvailableDevice, DeviceDescriptor, DeviceSelector, HostApi, StreamDirection};
pub use models::error::AudioError;
pub use models::message::{DeviceMessage, MicrophoneResponse};
pub use models::policy::FillPolicy;
pub use models::state::DeviceState;
pub use models::stream::{
    CapturedAudio, LatencyClass, RunMode, StartRequest, StopReport, StreamRequest, StreamStatus,
};
pub use processing::audio_clip::{AudioClip, Waveform};
pub use processing::recording_buffer::RecordingBuffer;
pub use session::microphone::MicrophoneDevice;
pub use session::registry::{StreamHandle, StreamKey, StreamRegistry, StreamSetup};
pub use session::speaker::SpeakerDevice;
pub use traits::driver::{AudioDriver, DriverStream};
pub use traits::listener::{DeviceListener, ListenerId, LogListener};
