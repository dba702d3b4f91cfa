/// Device session state machine.
///
/// State transitions:
/// ```text
/// closed → opening → idle → started ↔ idle
///                     ↓
///                  closing → closed
/// ```
///
/// `Opening` and `Closing` are transient; polling is refused while either
/// is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Closed,
    Opening,
    Idle,
    Started,
    Closing,
}

impl DeviceState {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Opening | Self::Closing)
    }

    /// Whether the stream is open (idle or started).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Idle | Self::Started)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Closing => "closing",
        }
    }
}
