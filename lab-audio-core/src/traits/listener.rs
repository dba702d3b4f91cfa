use std::fmt;

use crate::models::message::DeviceMessage;

/// Receiver of messages dispatched by a device session.
///
/// Called synchronously from whichever thread pumps the session. Keep
/// implementations cheap; forward to a channel if real work is needed.
pub trait DeviceListener: Send + Sync {
    fn receive_message(&self, message: &DeviceMessage);
}

/// Handle returned when a listener is attached, used to detach it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Listener that writes every message to the `log` facade.
#[derive(Debug, Clone)]
pub struct LogListener {
    level: log::Level,
}

impl LogListener {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LogListener {
    fn default() -> Self {
        Self::new(log::Level::Info)
    }
}

impl DeviceListener for LogListener {
    fn receive_message(&self, message: &DeviceMessage) {
        match message {
            DeviceMessage::Microphone(response) => log::log!(
                self.level,
                "mic #{} ({}) volume {:.3} at {}",
                response.device_index,
                response.device_name,
                response.volume,
                response.timestamp.to_rfc3339()
            ),
            DeviceMessage::DeviceRecovered { timestamp, device_index } => log::log!(
                self.level,
                "device #{} recovered at {}",
                device_index,
                timestamp.to_rfc3339()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_ids_are_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn log_listener_accepts_all_variants() {
        let listener = LogListener::default();
        listener.receive_message(&DeviceMessage::DeviceRecovered {
            timestamp: chrono::Utc::now(),
            device_index: 0,
        });
    }
}
