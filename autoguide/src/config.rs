use crate::error::{GuideError, GuideResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest duration any setting may ask for (about 31 years)
pub const MAX_DURATION_SECS: f64 = 1.0e9;

/// Seconds to a `Duration`, saturating instead of panicking on bad values
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// External correlation tool invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetToolConfig {
    /// Path to the correlation executable
    pub program: PathBuf,
    /// CCD region appended to each image path, `[xmin:xmax,ymin:ymax]`
    pub region: String,
    /// Background sky tile size in pixels (should be much larger than the star FWHM)
    pub tile_size: u32,
    /// Seconds before a running tool is killed and the cycle skipped
    pub timeout_secs: f64,
}

impl Default for OffsetToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/home/paul/pixelshift/pixelshift"),
            region: "[64:1984,64:1984]".to_string(),
            tile_size: 64,
            timeout_secs: 120.0,
        }
    }
}

impl OffsetToolConfig {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_secs)
    }
}

/// Mount-control settings
///
/// Without a guide command the corrections are only narrated to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Program receiving `<args...> <dx> <dy>`
    pub guide_command: Option<PathBuf>,
    /// Fixed arguments placed before the offsets
    pub guide_args: Vec<String>,
    /// Seconds before a running guide command is killed
    pub timeout_secs: f64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            guide_command: None,
            guide_args: Vec::new(),
            timeout_secs: 30.0,
        }
    }
}

impl MountConfig {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_secs)
    }
}

/// Configuration for the guiding daemon
///
/// Defaults reproduce the constants the observatory ran with for years.
/// Tests shrink the timing fields to milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiderConfig {
    /// Root of the nightly `<YYYYMMDD>` directories
    pub base_dir: PathBuf,
    /// Glob pattern selecting image files inside a night directory
    pub image_pattern: String,
    /// Shift log; relative paths land inside the night directory
    pub log_file: PathBuf,
    /// Seconds without a new image before the night is declared over
    pub idle_timeout_secs: f64,
    /// Seconds between directory scans while idle
    pub poll_interval_secs: f64,
    /// Seconds to wait after a new file appears so it is fully on disk
    pub settle_delay_secs: f64,
    /// Seconds before the first look for a night directory
    pub directory_initial_backoff_secs: f64,
    /// Seconds between subsequent looks for a night directory
    pub directory_retry_backoff_secs: f64,
    /// Largest guide shift applied, pixels
    pub max_correction: f64,
    /// Skip mount dispatch but still compute and log corrections
    pub dry_run: bool,
    /// Narrate reference and check file names every cycle
    pub verbose: bool,
    /// Correlation tool settings
    pub offset_tool: OffsetToolConfig,
    /// Mount-control settings
    pub mount: MountConfig,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/home/paul/OBS_DATA/"),
            image_pattern: "*.fits".to_string(),
            log_file: PathBuf::from("guider.log"),
            idle_timeout_secs: 8000.0,
            poll_interval_secs: 1.0,
            settle_delay_secs: 1.0,
            directory_initial_backoff_secs: 10.0,
            directory_retry_backoff_secs: 120.0,
            max_correction: 15.0,
            dry_run: false,
            verbose: false,
            offset_tool: OffsetToolConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

impl GuiderConfig {
    pub fn idle_timeout(&self) -> Duration {
        seconds(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        seconds(self.settle_delay_secs)
    }

    pub fn directory_initial_backoff(&self) -> Duration {
        seconds(self.directory_initial_backoff_secs)
    }

    pub fn directory_retry_backoff(&self) -> Duration {
        seconds(self.directory_retry_backoff_secs)
    }

    /// Number of idle poll ticks that fit in the idle timeout
    pub fn idle_tick_budget(&self) -> u64 {
        (self.idle_timeout_secs / self.poll_interval_secs).floor() as u64
    }

    /// Shift log location for a given night directory
    pub fn log_path_in(&self, data_directory: &Path) -> PathBuf {
        if self.log_file.is_absolute() {
            self.log_file.clone()
        } else {
            data_directory.join(&self.log_file)
        }
    }

    /// Check the configuration for values that would stall or disable the loop
    pub fn validate(&self) -> GuideResult<()> {
        let non_negative = [
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("settle_delay_secs", self.settle_delay_secs),
            (
                "directory_initial_backoff_secs",
                self.directory_initial_backoff_secs,
            ),
            (
                "directory_retry_backoff_secs",
                self.directory_retry_backoff_secs,
            ),
            ("offset_tool.timeout_secs", self.offset_tool.timeout_secs),
            ("mount.timeout_secs", self.mount.timeout_secs),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || !(0.0..=MAX_DURATION_SECS).contains(&value) {
                return Err(GuideError::InvalidConfig(format!(
                    "{name} must be between 0 and {MAX_DURATION_SECS} seconds, got {value}"
                )));
            }
        }

        if !self.poll_interval_secs.is_finite()
            || self.poll_interval_secs <= 0.0
            || self.poll_interval_secs > MAX_DURATION_SECS
        {
            return Err(GuideError::InvalidConfig(format!(
                "poll_interval_secs must be positive and at most {MAX_DURATION_SECS}, got {}",
                self.poll_interval_secs
            )));
        }
        if !self.max_correction.is_finite() || self.max_correction <= 0.0 {
            return Err(GuideError::InvalidConfig(format!(
                "max_correction must be positive, got {}",
                self.max_correction
            )));
        }
        if self.offset_tool.tile_size == 0 {
            return Err(GuideError::InvalidConfig(
                "offset_tool.tile_size must be non-zero".to_string(),
            ));
        }
        if self.image_pattern.trim().is_empty() {
            return Err(GuideError::InvalidConfig(
                "image_pattern must not be empty".to_string(),
            ));
        }
        glob::Pattern::new(&self.image_pattern)?;
        Ok(())
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file; missing fields take their defaults
    pub fn load_from_file(path: &Path) -> GuideResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observatory_constants() {
        let config = GuiderConfig::default();
        assert_eq!(config.image_pattern, "*.fits");
        assert_eq!(config.log_file, PathBuf::from("guider.log"));
        assert_eq!(config.idle_timeout(), Duration::from_secs(8000));
        assert_eq!(config.max_correction, 15.0);
        assert_eq!(config.offset_tool.region, "[64:1984,64:1984]");
        assert_eq!(config.offset_tool.tile_size, 64);
        assert_eq!(config.directory_initial_backoff(), Duration::from_secs(10));
        assert_eq!(config.directory_retry_backoff(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_idle_tick_budget() {
        let mut config = GuiderConfig::default();
        assert_eq!(config.idle_tick_budget(), 8000);

        config.idle_timeout_secs = 0.05;
        config.poll_interval_secs = 0.01;
        assert_eq!(config.idle_tick_budget(), 5);
    }

    #[test]
    fn test_relative_log_lands_in_night_directory() {
        let config = GuiderConfig::default();
        let night = Path::new("/data/20240310");
        assert_eq!(
            config.log_path_in(night),
            PathBuf::from("/data/20240310/guider.log")
        );

        let config = GuiderConfig {
            log_file: PathBuf::from("/var/log/guider.log"),
            ..GuiderConfig::default()
        };
        assert_eq!(
            config.log_path_in(night),
            PathBuf::from("/var/log/guider.log")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_poll = GuiderConfig {
            poll_interval_secs: 0.0,
            ..GuiderConfig::default()
        };
        assert!(matches!(
            zero_poll.validate(),
            Err(GuideError::InvalidConfig(_))
        ));

        let negative_ceiling = GuiderConfig {
            max_correction: -1.0,
            ..GuiderConfig::default()
        };
        assert!(negative_ceiling.validate().is_err());

        let mut zero_tile = GuiderConfig::default();
        zero_tile.offset_tool.tile_size = 0;
        assert!(zero_tile.validate().is_err());

        let bad_pattern = GuiderConfig {
            image_pattern: "[".to_string(),
            ..GuiderConfig::default()
        };
        assert!(matches!(bad_pattern.validate(), Err(GuideError::Glob(_))));
    }

    #[test]
    fn test_huge_durations_are_rejected_without_panicking() {
        let huge_idle = GuiderConfig {
            idle_timeout_secs: 1e20,
            ..GuiderConfig::default()
        };
        assert!(matches!(
            huge_idle.validate(),
            Err(GuideError::InvalidConfig(_))
        ));
        assert_eq!(huge_idle.idle_timeout(), Duration::MAX);

        let mut huge_tool = GuiderConfig::default();
        huge_tool.offset_tool.timeout_secs = 1e20;
        assert!(huge_tool.validate().is_err());
        assert_eq!(huge_tool.offset_tool.timeout(), Duration::MAX);

        let huge_poll = GuiderConfig {
            poll_interval_secs: 1e20,
            ..GuiderConfig::default()
        };
        assert!(huge_poll.validate().is_err());

        let negative = GuiderConfig {
            settle_delay_secs: -1.0,
            ..GuiderConfig::default()
        };
        assert!(negative.validate().is_err());
        assert_eq!(negative.settle_delay(), Duration::ZERO);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guider.json");
        std::fs::write(
            &path,
            r#"{ "base_dir": "/srv/obs", "max_correction": 8.5, "offset_tool": { "tile_size": 32 } }"#,
        )
        .unwrap();

        let config = GuiderConfig::load_from_file(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/obs"));
        assert_eq!(config.max_correction, 8.5);
        assert_eq!(config.offset_tool.tile_size, 32);
        assert_eq!(config.offset_tool.region, "[64:1984,64:1984]");
        assert_eq!(config.image_pattern, "*.fits");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guider.json");
        let config = GuiderConfig {
            dry_run: true,
            mount: MountConfig {
                guide_command: Some(PathBuf::from("/usr/local/bin/guide")),
                guide_args: vec!["--port".to_string(), "/dev/ttyUSB0".to_string()],
                timeout_secs: 5.0,
            },
            ..GuiderConfig::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = GuiderConfig::load_from_file(&path).unwrap();
        assert!(loaded.dry_run);
        assert_eq!(loaded.mount.guide_args, config.mount.guide_args);
        assert_eq!(loaded.mount.guide_command, config.mount.guide_command);
    }
}
