//! Stand-ins for the external tool and the mount, for tests and rehearsals

use crate::error::{MountError, OffsetError};
use crate::mount::MountControl;
use crate::offset::{OffsetSource, PixelOffset};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Scripted reply of a [`ScriptedOffsetSource`]
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Offset(f64, f64),
    /// Behave as if the tool printed something other than two numbers
    Unparseable(String),
}

/// Offset source returning queued replies in order
///
/// Once the queue is empty it keeps answering with the fallback offset. Clones
/// share the queue and the record of comparisons.
#[derive(Debug, Clone)]
pub struct ScriptedOffsetSource {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    fallback: PixelOffset,
    comparisons: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
}

impl ScriptedOffsetSource {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            fallback: PixelOffset::new(0.0, 0.0),
            comparisons: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Source that always reports the same offset
    pub fn constant(dx: f64, dy: f64) -> Self {
        Self {
            fallback: PixelOffset::new(dx, dy),
            ..Self::new(Vec::new())
        }
    }

    /// `(check, reference)` pairs measured so far
    pub fn comparisons(&self) -> Vec<(PathBuf, PathBuf)> {
        self.comparisons.lock().unwrap().clone()
    }
}

impl OffsetSource for ScriptedOffsetSource {
    fn measure(&mut self, check: &Path, reference: &Path) -> Result<PixelOffset, OffsetError> {
        self.comparisons
            .lock()
            .unwrap()
            .push((check.to_path_buf(), reference.to_path_buf()));

        match self.replies.lock().unwrap().pop_front() {
            Some(ScriptedReply::Offset(dx, dy)) => Ok(PixelOffset::new(dx, dy)),
            Some(ScriptedReply::Unparseable(output)) => Err(OffsetError::Parse { output }),
            None => Ok(self.fallback),
        }
    }
}

/// Mount that records every correction it receives
///
/// Clones share the record, so a test can keep one handle while the controller
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingMount {
    calls: Arc<Mutex<Vec<(f64, f64)>>>,
    fail: bool,
}

impl RecordingMount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount that records the call and then reports failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(f64, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl MountControl for RecordingMount {
    fn apply_offset(&mut self, dx: f64, dy: f64) -> Result<(), MountError> {
        self.calls.lock().unwrap().push((dx, dy));
        if self.fail {
            Err(MountError::Rejected("mount offline".to_string()))
        } else {
            Ok(())
        }
    }
}
