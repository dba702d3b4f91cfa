//! # lab-audio-virtual
//!
//! In-memory audio backend for lab-audio.
//!
//! Provides:
//! - `VirtualDriver`: `AudioDriver` over simulated devices, with hooks to
//!   unplug devices, refuse sample rates, and put capture devices to sleep
//! - `VirtualDevice`: endpoint description plus scripted capture behaviour
//! - `VirtualStream`: the `DriverStream` handed out by the driver
//!
//! Linked speakers are audible to microphones, so speaker discovery can be
//! exercised without hardware.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use lab_audio_core::{AudioPreferences, MicrophoneConfig, MicrophoneDevice, StreamRegistry};
//! use lab_audio_virtual::{VirtualDevice, VirtualDriver};
//!
//! let driver = VirtualDriver::new().with_device(VirtualDevice::microphone(0, "Mic", 48000, 1));
//! let registry = Arc::new(StreamRegistry::new());
//! let mut mic = MicrophoneDevice::new(
//!     Arc::new(driver),
//!     registry,
//!     &AudioPreferences::default(),
//!     MicrophoneConfig::default(),
//! )?;
//! mic.start(None, false, None)?;
//! ```

pub mod device;
pub mod driver;
pub mod stream;

pub use device::VirtualDevice;
pub use driver::{StreamStats, VirtualDriver};
pub use stream::VirtualStream;
