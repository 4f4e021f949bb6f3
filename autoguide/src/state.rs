use serde::{Deserialize, Serialize};

/// Night controller states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NightState {
    /// Polling for tonight's data directory
    AwaitingDirectory,
    /// Directory found, choosing a reference image
    AwaitingFirstImage,
    /// Comparing each new image of the field against the reference
    WatchingField,
    /// The current session ended; the next cycle looks for a directory again
    NightOver { reason: NightOverReason },
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NightOverReason {
    /// An image of a different field arrived
    FieldChange,
    /// No new image within the idle timeout
    IdleTimeout,
    /// The mount reported a failed correction
    DispatchFailed,
}

impl NightOverReason {
    /// Whether this ending may move the daemon on to the next night
    ///
    /// A field change keeps the same night; the other endings request
    /// tomorrow's directory when they happen in the evening.
    pub fn ends_night(&self) -> bool {
        !matches!(self, Self::FieldChange)
    }
}

impl std::fmt::Display for NightOverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldChange => write!(f, "field change"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::DispatchFailed => write!(f, "correction dispatch failed"),
        }
    }
}

/// How a controller run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown was requested
    Shutdown,
}
