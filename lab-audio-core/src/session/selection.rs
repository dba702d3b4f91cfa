//! Device filtering and best-match selection.

use crate::models::config::AudioPreferences;
use crate::models::device::{AvailableDevice, DeviceDescriptor, DeviceSelector, HostApi};
use crate::models::error::AudioError;
use crate::traits::driver::AudioDriver;

/// Apply host preferences to a device list. With `force_wasapi_only` on
/// Windows, only WASAPI devices survive.
pub fn filter_for_host(devices: Vec<DeviceDescriptor>, prefs: &AudioPreferences) -> Vec<DeviceDescriptor> {
    if prefs.force_wasapi_only && cfg!(target_os = "windows") {
        devices
            .into_iter()
            .filter(|d| d.host_api == HostApi::Wasapi)
            .collect()
    } else {
        devices
    }
}

/// Capture-capable devices visible under `prefs`.
pub fn capture_devices(
    driver: &dyn AudioDriver,
    prefs: &AudioPreferences,
) -> Result<Vec<DeviceDescriptor>, AudioError> {
    let devices = filter_for_host(driver.enumerate_devices()?, prefs);
    Ok(devices.into_iter().filter(DeviceDescriptor::is_capture).collect())
}

/// Playback-capable devices visible under `prefs`.
pub fn playback_devices(
    driver: &dyn AudioDriver,
    prefs: &AudioPreferences,
) -> Result<Vec<DeviceDescriptor>, AudioError> {
    let devices = filter_for_host(driver.enumerate_devices()?, prefs);
    Ok(devices.into_iter().filter(DeviceDescriptor::is_playback).collect())
}

/// Pick the device addressed by `selector` that best fits the requested
/// format.
///
/// The first device matching the selector, sample rate and input channel
/// count wins. Without an exact match the first device matching the selector
/// alone is used and a warning is logged. An unset rate or channel count
/// matches anything.
pub fn find_best_device(
    devices: &[DeviceDescriptor],
    selector: &DeviceSelector,
    sample_rate: Option<u32>,
    channels: Option<u16>,
) -> Result<DeviceDescriptor, AudioError> {
    let mut candidates = devices.iter().filter(|d| d.matches(selector)).peekable();
    let fallback = candidates
        .peek()
        .copied()
        .ok_or_else(|| {
            AudioError::DeviceNotConnected(format!(
                "could not find any audio recording device with index {}",
                selector
            ))
        })?;

    let exact = candidates.find(|d| {
        sample_rate.map_or(true, |rate| d.default_sample_rate == rate)
            && channels.map_or(true, |ch| d.input_channels == ch)
    });

    match exact {
        Some(device) => Ok(device.clone()),
        None => {
            log::warn!(
                "Could not find exact match for specified parameters (index={}, sample_rate={:?}, \
                 channels={:?}), falling back to best approximation (index={}, name={}, \
                 sample_rate={}, channels={})",
                selector,
                sample_rate,
                channels,
                fallback.index,
                fallback.name,
                fallback.default_sample_rate,
                fallback.input_channels
            );
            Ok(fallback.clone())
        }
    }
}

/// Picker summaries for capture devices; the name is used as the index
/// when there is one.
pub fn available_capture_devices(devices: &[DeviceDescriptor]) -> Vec<AvailableDevice> {
    devices
        .iter()
        .filter(|d| d.is_capture())
        .map(|d| AvailableDevice {
            device_name: display_name(d, "Unknown Microphone"),
            index: selector_for(d),
            sample_rate: Some(d.default_sample_rate),
            channels: Some(d.input_channels),
        })
        .collect()
}

/// Picker summaries for playback devices.
pub fn available_playback_devices(devices: &[DeviceDescriptor]) -> Vec<AvailableDevice> {
    devices
        .iter()
        .filter(|d| d.is_playback())
        .map(|d| AvailableDevice {
            device_name: display_name(d, "Unknown Speaker"),
            index: DeviceSelector::Index(d.index),
            sample_rate: Some(d.default_sample_rate),
            channels: Some(d.output_channels),
        })
        .collect()
}

fn display_name(device: &DeviceDescriptor, fallback: &str) -> String {
    if device.name.is_empty() {
        fallback.to_string()
    } else {
        device.name.clone()
    }
}

fn selector_for(device: &DeviceDescriptor) -> DeviceSelector {
    if device.name.is_empty() {
        DeviceSelector::Index(device.index)
    } else {
        DeviceSelector::Name(device.name.clone())
    }
}
