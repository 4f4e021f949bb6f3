use crate::state::NightOverReason;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

/// Events emitted for external callbacks
#[derive(Debug, Clone)]
pub enum GuiderEvent {
    /// A night directory was found and a new session started
    DirectoryFound { date: NaiveDate, path: PathBuf },
    /// A reference image was chosen for the session
    ReferenceSelected {
        name: String,
        field: String,
        image_count: usize,
    },
    /// A correction passed the guard and was applied (or simulated)
    CorrectionApplied {
        reference: String,
        check: String,
        dx: f64,
        dy: f64,
        simulated: bool,
    },
    /// A correction reached the ceiling and was dropped
    CorrectionRejected { check: String, dx: f64, dy: f64 },
    /// The offset tool failed for one image pair
    OffsetFailed { check: String, error: String },
    /// The session ended
    NightOver {
        reason: NightOverReason,
        /// Whether the next directory search targets tomorrow's night
        rollover_requested: bool,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type GuiderCallback = Arc<dyn Fn(&GuiderEvent) + Send + Sync>;
