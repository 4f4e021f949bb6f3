//! Polling for new images in a night directory.
//!
//! Classification uses only directory listings, file metadata and file names;
//! image contents are never opened.

use crate::clock::Clock;
use crate::config::GuiderConfig;
use crate::error::GuideResult;
use crate::shutdown::ShutdownToken;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Idle ticks between "no new images" progress lines
const PROGRESS_EVERY_TICKS: u64 = 5;

/// One image file discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageObservation {
    /// Full path to the file
    pub path: PathBuf,
    /// File name as written by the camera software
    pub name: String,
    /// Target identifier shared by every image of one field
    pub field_identifier: String,
    /// Creation time, or modification time where birth time is unavailable
    pub created: SystemTime,
}

impl ImageObservation {
    /// Stat `path` and derive its field identifier
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let created = metadata.created().or_else(|_| metadata.modified())?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            field_identifier: field_identifier(&name).to_string(),
            name,
            created,
        })
    }

    /// True when this file's name carries `field`
    pub fn belongs_to(&self, field: &str) -> bool {
        self.name.contains(field)
    }
}

/// Field identifier of an image file name: everything before the first `-`
pub fn field_identifier(file_name: &str) -> &str {
    file_name.split('-').next().unwrap_or(file_name)
}

/// Result of waiting for the next image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A new image of the current field, or the first image of a fresh start
    NewImage(ImageObservation),
    /// The newest image belongs to a different field
    NewFieldDetected(ImageObservation),
    /// No new image within the idle timeout
    TimedOut,
    /// Shutdown was requested while waiting
    Shutdown,
}

/// List image files in `directory` matching the glob `pattern`, sorted by name
pub fn list_images(directory: &Path, pattern: &str) -> GuideResult<Vec<PathBuf>> {
    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&directory.to_string_lossy()),
        pattern
    );

    let mut images = Vec::new();
    for entry in glob::glob(&full_pattern)? {
        match entry {
            Ok(path) => {
                if path.is_file() {
                    images.push(path);
                }
            }
            Err(e) => {
                log::warn!("Error accessing image path: {e}");
            }
        }
    }
    Ok(images)
}

/// Most recently created image among `paths`
///
/// Files that vanish between listing and stat are skipped. Equal timestamps
/// are broken by file name so the choice is deterministic.
pub fn newest_image(paths: &[PathBuf]) -> Option<ImageObservation> {
    paths
        .iter()
        .filter_map(|path| match ImageObservation::from_path(path) {
            Ok(observation) => Some(observation),
            Err(e) => {
                log::warn!("Could not stat {}: {e}", path.display());
                None
            }
        })
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)))
}

/// Watches one night directory for new image arrivals
pub struct ImageWatcher {
    directory: PathBuf,
    pattern: String,
    poll_interval: Duration,
    settle_delay: Duration,
    idle_tick_budget: u64,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownToken,
}

impl ImageWatcher {
    pub fn new(
        config: &GuiderConfig,
        directory: PathBuf,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            directory,
            pattern: config.image_pattern.clone(),
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            idle_tick_budget: config.idle_tick_budget(),
            clock,
            shutdown,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current image files in the watched directory
    pub fn images(&self) -> GuideResult<Vec<PathBuf>> {
        list_images(&self.directory, &self.pattern)
    }

    /// Number of image files currently in the watched directory
    pub fn image_count(&self) -> GuideResult<usize> {
        Ok(self.images()?.len())
    }

    /// Block until a new image arrives, the idle budget runs out, or shutdown
    ///
    /// `field` is the reference field identifier, `None` before a reference is
    /// established. `baseline` is the image count already accounted for.
    pub fn wait_for_image(
        &self,
        field: Option<&str>,
        baseline: usize,
    ) -> GuideResult<WatchOutcome> {
        let mut baseline = baseline;
        let mut idle_ticks: u64 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return Ok(WatchOutcome::Shutdown);
            }

            let count = self.image_count()?;

            if count > baseline {
                // Give the writer a moment to finish the file
                if !self.shutdown.sleep(self.settle_delay) {
                    return Ok(WatchOutcome::Shutdown);
                }
                let images = self.images()?;
                match newest_image(&images) {
                    Some(newest) => return Ok(self.classify(field, newest)),
                    None => continue,
                }
            }

            if count < baseline {
                log::warn!(
                    "Image count in {} dropped from {baseline} to {count}, rebasing",
                    self.directory.display()
                );
                baseline = count;
            }

            idle_ticks += 1;
            if !self.shutdown.sleep(self.poll_interval) {
                return Ok(WatchOutcome::Shutdown);
            }
            if idle_ticks % PROGRESS_EVERY_TICKS == 0 {
                log::info!(
                    "[{idle_ticks}/{}:{baseline} - {}] No new images...",
                    self.idle_tick_budget,
                    self.clock.utc_now().format("%Y-%m-%d %H:%M:%S")
                );
            }
            if idle_ticks > self.idle_tick_budget {
                let waited = self.poll_interval.as_secs_f64() * idle_ticks as f64;
                log::info!("No new images in {:.1} min", waited / 60.0);
                return Ok(WatchOutcome::TimedOut);
            }
        }
    }

    fn classify(&self, field: Option<&str>, newest: ImageObservation) -> WatchOutcome {
        match field {
            None => {
                log::info!("New start with {}", newest.name);
                WatchOutcome::NewImage(newest)
            }
            Some(field) if !newest.belongs_to(field) => {
                log::info!("New field detected: {} is not {field}", newest.name);
                WatchOutcome::NewFieldDetected(newest)
            }
            Some(_) => {
                log::debug!("Same field, continuing with {}", newest.name);
                WatchOutcome::NewImage(newest)
            }
        }
    }
}
