//! Test helpers for autoguide
//!
//! Temporary observing-data trees: a base directory holding `YYYYMMDD` night
//! directories, with helpers for dropping image files into them the way the
//! camera pipeline does.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;

/// Pause after each write so consecutive images get distinct timestamps
pub const IMAGE_ORDERING_GAP: Duration = Duration::from_millis(15);

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to create fixture directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A throwaway base directory with at most one night directory in use
///
/// The whole tree is deleted when the fixture drops.
pub struct NightFixture {
    base: TempDir,
    night_name: String,
}

impl NightFixture {
    /// Base directory with the night directory `night_name` already present
    pub fn new(night_name: &str) -> Result<Self, TestHelperError> {
        let fixture = Self::without_night(night_name)?;
        fixture.create_night_dir()?;
        Ok(fixture)
    }

    /// Base directory where the night directory has not been created yet
    pub fn without_night(night_name: &str) -> Result<Self, TestHelperError> {
        let base = tempfile::tempdir().map_err(TestHelperError::CreateDir)?;
        Ok(Self {
            base,
            night_name: night_name.to_string(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        self.base.path()
    }

    pub fn night_dir(&self) -> PathBuf {
        self.base.path().join(&self.night_name)
    }

    pub fn create_night_dir(&self) -> Result<PathBuf, TestHelperError> {
        let dir = self.night_dir();
        std::fs::create_dir_all(&dir).map_err(TestHelperError::CreateDir)?;
        Ok(dir)
    }

    /// Drop an image into the night directory
    pub fn write_image(&self, name: &str) -> Result<PathBuf, TestHelperError> {
        write_image_in(&self.night_dir(), name)
    }

    /// Drop an image from a background thread once `delay` has passed
    pub fn write_image_after(
        &self,
        delay: Duration,
        name: &str,
    ) -> JoinHandle<Result<PathBuf, TestHelperError>> {
        let dir = self.night_dir();
        let name = name.to_string();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            write_image_in(&dir, &name)
        })
    }

    /// Lines of a text file inside the night directory, empty if it is absent
    pub fn read_lines(&self, file_name: &str) -> Result<Vec<String>, TestHelperError> {
        let path = self.night_dir().join(file_name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|source| TestHelperError::Read { path, source })?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

/// Drop an image into `dir`
pub fn write_image_in(dir: &Path, name: &str) -> Result<PathBuf, TestHelperError> {
    let path = dir.join(name);
    std::fs::write(&path, b"SIMPLE  =                    T")
        .map_err(|source| TestHelperError::Write {
            path: path.clone(),
            source,
        })?;
    std::thread::sleep(IMAGE_ORDERING_GAP);
    Ok(path)
}

/// Write `names` into `dir` from a background thread, one every `gap`
///
/// The first image lands after one `gap`. Missing directories are created, so
/// the sequence can also stand in for a night directory appearing late.
pub fn spawn_image_sequence(
    dir: PathBuf,
    gap: Duration,
    names: &[&str],
) -> JoinHandle<Result<Vec<PathBuf>, TestHelperError>> {
    let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    std::thread::spawn(move || {
        let mut written = Vec::with_capacity(names.len());
        for name in &names {
            std::thread::sleep(gap);
            std::fs::create_dir_all(&dir).map_err(TestHelperError::CreateDir)?;
            written.push(write_image_in(&dir, name)?);
        }
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_night_dir_created() {
        let fixture = NightFixture::new("20240310").unwrap();
        assert!(fixture.night_dir().is_dir());
        assert_eq!(fixture.night_dir(), fixture.base_dir().join("20240310"));
    }

    #[test]
    fn test_without_night_leaves_base_empty() {
        let fixture = NightFixture::without_night("20240310").unwrap();
        assert!(fixture.base_dir().is_dir());
        assert!(!fixture.night_dir().exists());
        fixture.create_night_dir().unwrap();
        assert!(fixture.night_dir().is_dir());
    }

    #[test]
    fn test_delayed_write_lands() {
        let fixture = NightFixture::new("20240310").unwrap();
        let handle = fixture.write_image_after(Duration::from_millis(5), "fieldA-001.fits");
        let path = handle.join().unwrap().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_image_sequence_creates_directory() {
        let fixture = NightFixture::without_night("20240311").unwrap();
        let handle = spawn_image_sequence(
            fixture.night_dir(),
            Duration::from_millis(1),
            &["fieldA-001.fits", "fieldA-002.fits"],
        );
        let written = handle.join().unwrap().unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|path| path.is_file()));
    }

    #[test]
    fn test_read_lines_missing_file_is_empty() {
        let fixture = NightFixture::new("20240310").unwrap();
        assert!(fixture.read_lines("guider.log").unwrap().is_empty());
        std::fs::write(fixture.night_dir().join("guider.log"), "a\nb\n").unwrap();
        assert_eq!(fixture.read_lines("guider.log").unwrap(), vec!["a", "b"]);
    }
}
