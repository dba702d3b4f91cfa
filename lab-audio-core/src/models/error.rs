use thiserror::Error;

/// Errors raised by recording buffers, driver streams and device sessions.
///
/// Transient driver conditions (overflow, empty polls, sleeping devices) are
/// logged and absorbed by the sessions and never surface as one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("invalid capture device: {0}")]
    InvalidCaptureDevice(String),

    #[error("stream not ready")]
    StreamNotReady,

    #[error("recording buffer is full")]
    RecordingBufferFull,

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("offset {offset} out of range for buffer of {capacity} frames")]
    OutOfRange { offset: i64, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("sample rate mismatch: clip is {clip} Hz, device is {device} Hz")]
    SampleRateMismatch { clip: u32, device: u32 },

    #[error("invalid clip: {0}")]
    InvalidClip(String),

    #[error("driver error: {0}")]
    Driver(String),
}
