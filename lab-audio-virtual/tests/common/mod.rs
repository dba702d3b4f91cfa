#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use lab_audio_core::models::config::MicrophoneConfig;
use lab_audio_core::models::device::DeviceSelector;
use lab_audio_core::models::message::DeviceMessage;
use lab_audio_core::session::registry::StreamRegistry;
use lab_audio_core::traits::driver::AudioDriver;
use lab_audio_core::traits::listener::DeviceListener;
use lab_audio_virtual::{VirtualDevice, VirtualDriver};

/// Sample rate used by the test devices; low so chunks stay small.
pub const RATE: u32 = 1000;

pub struct Rig {
    pub driver: VirtualDriver,
    pub registry: Arc<StreamRegistry>,
}

impl Rig {
    pub fn new(devices: Vec<VirtualDevice>) -> Self {
        let driver = VirtualDriver::new();
        for device in devices {
            driver.add_device(device);
        }
        Self {
            driver,
            registry: Arc::new(StreamRegistry::new()),
        }
    }

    pub fn audio_driver(&self) -> Arc<dyn AudioDriver> {
        Arc::new(self.driver.clone())
    }

    pub fn registry(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.registry)
    }
}

pub fn mic(index: i32, channels: u16) -> VirtualDevice {
    VirtualDevice::microphone(index, &format!("Mic {}", index), RATE, channels).with_frames_per_read(10)
}

pub fn speaker(index: i32) -> VirtualDevice {
    VirtualDevice::speaker(index, &format!("Speaker {}", index), RATE, 2)
}

pub fn mic_config(index: i32) -> MicrophoneConfig {
    MicrophoneConfig {
        device: Some(DeviceSelector::Index(index)),
        ..MicrophoneConfig::default()
    }
}

/// Listener that keeps every message it receives.
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<DeviceMessage>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<DeviceMessage> {
        self.messages.lock().clone()
    }
}

impl DeviceListener for Recorder {
    fn receive_message(&self, message: &DeviceMessage) {
        self.messages.lock().push(message.clone());
    }
}
