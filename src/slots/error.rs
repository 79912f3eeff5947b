#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    InvalidSessionDuration(u32),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotError::InvalidSessionDuration(m) => {
                write!(f, "invalid session duration: {m} minutes")
            }
            SlotError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for SlotError {}

/// Failure talking to the external calendar integration. Never surfaces to
/// the booking flow; it only downgrades the session to "disconnected".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    Transport(String),
    Status(u16),
    Decode(String),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::Transport(e) => write!(f, "external calendar unavailable: {e}"),
            CalendarError::Status(code) => {
                write!(f, "external calendar unavailable: HTTP {code}")
            }
            CalendarError::Decode(e) => write!(f, "external calendar response undecodable: {e}"),
        }
    }
}

impl std::error::Error for CalendarError {}
