use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::device::StreamDirection;
use crate::models::error::AudioError;
use crate::models::stream::{LatencyClass, RunMode, StreamRequest, StreamStatus};
use crate::traits::driver::{AudioDriver, DriverStream};

/// Registry key: one stream per physical device index and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub device_index: i32,
    pub direction: StreamDirection,
}

impl StreamKey {
    pub fn capture(device_index: i32) -> Self {
        Self {
            device_index,
            direction: StreamDirection::Capture,
        }
    }

    pub fn playback(device_index: i32) -> Self {
        Self {
            device_index,
            direction: StreamDirection::Playback,
        }
    }
}

/// Settings applied to a driver stream right after it opens, and again
/// whenever it is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamSetup {
    pub run_mode: Option<RunMode>,
    pub latency_bias: f64,
    /// Seconds of driver-side capture buffer to pre-allocate.
    pub capture_buffer_secs: Option<f64>,
}

/// One opened physical stream, shared by every device object addressing the
/// same index.
///
/// The driver stream sits behind its own mutex so sharers never interleave
/// driver calls.
pub struct StreamHandle {
    driver: Arc<dyn AudioDriver>,
    request: StreamRequest,
    setup: StreamSetup,
    stream: Mutex<Box<dyn DriverStream>>,
}

impl StreamHandle {
    /// Open a driver stream and apply `setup` to it.
    pub fn open(
        driver: Arc<dyn AudioDriver>,
        request: StreamRequest,
        setup: StreamSetup,
    ) -> Result<Self, AudioError> {
        let stream = Self::open_configured(driver.as_ref(), &request, &setup)?;
        Ok(Self {
            driver,
            request,
            setup,
            stream: Mutex::new(stream),
        })
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            device_index: self.request.device_index,
            direction: self.request.direction,
        }
    }

    pub fn device_index(&self) -> i32 {
        self.request.device_index
    }

    pub fn direction(&self) -> StreamDirection {
        self.request.direction
    }

    pub fn sample_rate(&self) -> u32 {
        self.request.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.request.channels
    }

    pub fn latency_class(&self) -> LatencyClass {
        self.request.latency_class
    }

    pub fn run_mode(&self) -> Option<RunMode> {
        self.setup.run_mode
    }

    /// Run `f` with exclusive access to the driver stream.
    pub fn with_stream<R>(&self, f: impl FnOnce(&mut dyn DriverStream) -> R) -> R {
        let mut stream = self.stream.lock();
        f(stream.as_mut())
    }

    pub fn is_closed(&self) -> bool {
        self.stream.lock().is_closed()
    }

    pub fn status(&self) -> Option<StreamStatus> {
        self.stream.lock().status()
    }

    /// Close the driver stream and open a fresh one with the same request.
    ///
    /// Every sharer of this handle sees the new stream. If opening fails the
    /// handle is left closed.
    pub fn reopen(&self) -> Result<(), AudioError> {
        let mut stream = self.stream.lock();
        stream.close();
        *stream = Self::open_configured(self.driver.as_ref(), &self.request, &self.setup)?;
        Ok(())
    }

    fn close(&self) {
        self.stream.lock().close();
    }

    fn open_configured(
        driver: &dyn AudioDriver,
        request: &StreamRequest,
        setup: &StreamSetup,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        let mut stream = driver.open_stream(request)?;
        if let Some(mode) = setup.run_mode {
            stream.set_run_mode(mode)?;
            log::debug!("Set run mode of device #{} to {:?}", request.device_index, mode);
        }
        stream.set_latency_bias(setup.latency_bias)?;
        if let Some(secs) = setup.capture_buffer_secs {
            stream.allocate_capture_buffer(secs)?;
            log::debug!(
                "Allocated stream buffer of device #{} to hold {} seconds of data",
                request.device_index,
                secs
            );
        }
        Ok(stream)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("request", &self.request)
            .field("setup", &self.setup)
            .finish_non_exhaustive()
    }
}

struct Entry {
    handle: Arc<StreamHandle>,
    refs: usize,
}

/// Process-wide table of open streams, keyed by physical device.
///
/// Created by the host and handed to every device object. Entries are
/// reference counted: the last device to release a stream closes it.
/// Opening happens under the registry lock, so two devices racing to open the
/// same index end up sharing one stream.
#[derive(Default)]
pub struct StreamRegistry {
    entries: Mutex<HashMap<StreamKey, Entry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the healthy stream registered under `key`, or register a new one
    /// produced by `open`. A registered stream that has died is reopened in
    /// place.
    pub fn acquire<F>(&self, key: StreamKey, open: F) -> Result<Arc<StreamHandle>, AudioError>
    where
        F: FnOnce() -> Result<StreamHandle, AudioError>,
    {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            if entry.handle.is_closed() {
                log::info!("Stream for device #{} was closed, reopening", key.device_index);
                entry.handle.reopen()?;
            } else {
                log::debug!("Sharing open stream for device #{}", key.device_index);
            }
            entry.refs += 1;
            return Ok(Arc::clone(&entry.handle));
        }

        log::debug!("Opening new {:?} stream for device #{}", key.direction, key.device_index);
        let handle = Arc::new(open()?);
        entries.insert(
            key,
            Entry {
                handle: Arc::clone(&handle),
                refs: 1,
            },
        );
        Ok(handle)
    }

    /// Drop one reference to `handle`. Returns true if this was the last one
    /// and the driver stream was closed.
    pub fn release(&self, handle: &Arc<StreamHandle>) -> bool {
        let key = handle.key();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&key) else {
            return false;
        };
        if !Arc::ptr_eq(&entry.handle, handle) {
            return false;
        }

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return false;
        }

        if let Some(entry) = entries.remove(&key) {
            entry.handle.close();
            log::debug!("Closed stream for device #{}", key.device_index);
        }
        true
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<StreamHandle>> {
        self.entries.lock().get(key).map(|e| Arc::clone(&e.handle))
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of device objects holding the stream under `key`.
    pub fn ref_count(&self, key: &StreamKey) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close every registered stream regardless of outstanding references.
    pub fn shutdown(&self) {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.handle.close();
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::device::DeviceDescriptor;
    use crate::models::stream::{CapturedAudio, StartRequest, StopReport};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct CountingDriver {
        counters: Arc<Counters>,
    }

    struct CountingStream {
        counters: Arc<Counters>,
        closed: bool,
    }

    impl AudioDriver for CountingDriver {
        fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
            Ok(Vec::new())
        }

        fn open_stream(&self, _request: &StreamRequest) -> Result<Box<dyn DriverStream>, AudioError> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingStream {
                counters: Arc::clone(&self.counters),
                closed: false,
            }))
        }
    }

    impl DriverStream for CountingStream {
        fn start(&mut self, _request: StartRequest) -> Result<f64, AudioError> {
            Ok(0.0)
        }
        fn stop(&mut self, _block: bool, _stop_time: Option<f64>) -> Result<StopReport, AudioError> {
            Ok(StopReport::default())
        }
        fn read_audio(&mut self) -> Result<CapturedAudio, AudioError> {
            Ok(CapturedAudio::default())
        }
        fn allocate_capture_buffer(&mut self, _secs: f64) -> Result<(), AudioError> {
            Ok(())
        }
        fn fill_buffer(&mut self, _samples: &[f32]) -> Result<(), AudioError> {
            Ok(())
        }
        fn set_run_mode(&mut self, _mode: RunMode) -> Result<(), AudioError> {
            Ok(())
        }
        fn latency_bias(&self) -> f64 {
            0.0
        }
        fn set_latency_bias(&mut self, _secs: f64) -> Result<(), AudioError> {
            Ok(())
        }
        fn status(&self) -> Option<StreamStatus> {
            (!self.closed).then(StreamStatus::default)
        }
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.counters.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn setup() -> (Arc<Counters>, Arc<dyn AudioDriver>) {
        let counters = Arc::new(Counters::default());
        let driver: Arc<dyn AudioDriver> = Arc::new(CountingDriver {
            counters: Arc::clone(&counters),
        });
        (counters, driver)
    }

    fn request(index: i32) -> StreamRequest {
        StreamRequest {
            device_index: index,
            direction: StreamDirection::Capture,
            sample_rate: 48000,
            channels: 1,
            latency_class: LatencyClass::LowLatency,
        }
    }

    fn open(driver: &Arc<dyn AudioDriver>, index: i32) -> impl FnOnce() -> Result<StreamHandle, AudioError> {
        let driver = Arc::clone(driver);
        move || StreamHandle::open(driver, request(index), StreamSetup::default())
    }

    #[test]
    fn same_index_shares_one_stream() {
        let (counters, driver) = setup();
        let registry = StreamRegistry::new();

        let a = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();
        let b = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count(&StreamKey::capture(1)), 2);
    }

    #[test]
    fn last_release_closes_stream() {
        let (counters, driver) = setup();
        let registry = StreamRegistry::new();

        let a = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();
        let b = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();

        assert!(!registry.release(&a));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
        assert!(!b.is_closed());

        assert!(registry.release(&b));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn directions_are_separate_entries() {
        let (counters, driver) = setup();
        let registry = StreamRegistry::new();

        registry.acquire(StreamKey::capture(3), open(&driver, 3)).unwrap();
        registry.acquire(StreamKey::playback(3), open(&driver, 3)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dead_stream_is_reopened_on_acquire() {
        let (counters, driver) = setup();
        let registry = StreamRegistry::new();

        let a = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();
        a.with_stream(|s| s.close());
        assert!(a.is_closed());

        let b = registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_closed());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reopen_replaces_driver_stream() {
        let (counters, driver) = setup();
        let handle = StreamHandle::open(driver, request(0), StreamSetup::default()).unwrap();

        handle.reopen().unwrap();

        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(!handle.is_closed());
    }

    #[test]
    fn shutdown_closes_everything() {
        let (counters, driver) = setup();
        let registry = StreamRegistry::new();
        registry.acquire(StreamKey::capture(0), open(&driver, 0)).unwrap();
        registry.acquire(StreamKey::capture(1), open(&driver, 1)).unwrap();

        registry.shutdown();

        assert!(registry.is_empty());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }
}
