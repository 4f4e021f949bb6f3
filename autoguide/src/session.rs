//! Night directory resolution and the per-night session record.
//!
//! Observing nights span midnight, so a night is named after the calendar date
//! on which its evening began. Data for a night lives in `<base>/<YYYYMMDD>/`.

use crate::watcher::ImageObservation;
use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};
use std::path::{Path, PathBuf};

/// Date of the observing night that `now` belongs to
///
/// Before local noon the night started on the previous calendar date. A
/// request for tomorrow's night is ignored before noon: the next night cannot
/// have started yet, and the night that is "now" is still the previous date.
pub fn resolve_session_date(now: NaiveDateTime, rollover_requested: bool) -> NaiveDate {
    let is_am = now.hour() < 12;
    let rollover = rollover_requested && !is_am;

    let mut date = now.date();
    if is_am {
        date = date - Days::new(1);
    }
    if rollover {
        date = date + Days::new(1);
    }
    date
}

/// Directory name for a night, `YYYYMMDD`
pub fn session_directory_name(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Outcome of looking for a night directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryLookup {
    /// The directory exists
    Found(PathBuf),
    /// The directory does not exist yet; carries the path that was checked
    NotFound(PathBuf),
}

/// Maps wall-clock time onto a nightly data directory
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    base_dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the directory holding data for `date`
    pub fn directory_for(&self, date: NaiveDate) -> PathBuf {
        self.base_dir.join(session_directory_name(date))
    }

    /// Look up the directory for the night at `now`. Read-only.
    pub fn resolve(&self, now: NaiveDateTime, rollover_requested: bool) -> DirectoryLookup {
        self.lookup(resolve_session_date(now, rollover_requested))
    }

    /// Look up the directory for a known night date. Read-only.
    pub fn lookup(&self, date: NaiveDate) -> DirectoryLookup {
        let path = self.directory_for(date);
        log::debug!("Looking for {}", path.display());
        if path.is_dir() {
            DirectoryLookup::Found(path)
        } else {
            DirectoryLookup::NotFound(path)
        }
    }
}

/// One observing night on one field
#[derive(Debug, Clone)]
pub struct NightSession {
    /// Night date (evening calendar date)
    pub date: NaiveDate,
    /// Directory holding the night's images
    pub data_directory: PathBuf,
    /// Image every later frame is compared against
    pub reference_image: Option<ImageObservation>,
    /// Number of images present when the baseline was last refreshed
    pub image_count_at_reference: usize,
}

impl NightSession {
    pub fn new(date: NaiveDate, data_directory: PathBuf) -> Self {
        Self {
            date,
            data_directory,
            reference_image: None,
            image_count_at_reference: 0,
        }
    }

    /// Field identifier of the reference image, if one is established
    pub fn field(&self) -> Option<&str> {
        self.reference_image
            .as_ref()
            .map(|image| image.field_identifier.as_str())
    }
}
