use crate::models::device::DeviceDescriptor;
use crate::models::error::AudioError;
use crate::models::stream::{CapturedAudio, RunMode, StartRequest, StopReport, StreamRequest, StreamStatus};

/// Entry point of a platform audio backend.
///
/// Implementations enumerate physical devices and open streams on them. The
/// device layer never talks to hardware except through this trait and
/// [`DriverStream`].
pub trait AudioDriver: Send + Sync {
    /// All devices the backend can see, capture and playback alike.
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError>;

    /// Open a stream on a physical device.
    fn open_stream(&self, request: &StreamRequest) -> Result<Box<dyn DriverStream>, AudioError>;
}

/// One opened driver stream.
///
/// Capture streams buffer samples internally until `read_audio` drains them;
/// callers must read faster than the buffer allocated with
/// `allocate_capture_buffer` fills up, or the driver reports an overflow.
pub trait DriverStream: Send {
    /// Start the stream. Returns the (estimated) absolute start time.
    fn start(&mut self, request: StartRequest) -> Result<f64, AudioError>;

    /// Stop the stream, optionally blocking until the hardware has stopped.
    fn stop(&mut self, block_until_stopped: bool, stop_time: Option<f64>) -> Result<StopReport, AudioError>;

    /// Drain samples captured since the previous call.
    fn read_audio(&mut self) -> Result<CapturedAudio, AudioError>;

    /// Pre-allocate the driver-side capture buffer.
    fn allocate_capture_buffer(&mut self, secs: f64) -> Result<(), AudioError>;

    /// Queue interleaved samples for playback.
    fn fill_buffer(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    fn set_run_mode(&mut self, mode: RunMode) -> Result<(), AudioError>;

    fn latency_bias(&self) -> f64;

    fn set_latency_bias(&mut self, secs: f64) -> Result<(), AudioError>;

    /// Current driver status, or None if the stream is closed.
    fn status(&self) -> Option<StreamStatus>;

    /// Release the driver resources. Closing twice is a no-op.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
