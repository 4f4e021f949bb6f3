use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the night controller and its filesystem plumbing.
#[derive(Error, Debug)]
pub enum GuideError {
    /// No image appeared within the idle timeout on a fresh night start.
    #[error("no images arrived within {:.1}s of the night starting", .waited.as_secs_f64())]
    NoImagesTonight {
        /// Idle timeout that elapsed.
        waited: Duration,
    },

    /// Filesystem error while scanning a session directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured image pattern could not be compiled.
    #[error("invalid image pattern: {0}")]
    Glob(#[from] glob::PatternError),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {0}")]
    ConfigFile(#[from] serde_json::Error),
}

/// Errors from the external correlation tool. All of them skip one cycle.
#[derive(Error, Debug)]
pub enum OffsetError {
    /// The tool could not be started.
    #[error("failed to launch offset tool: {0}")]
    Spawn(#[source] std::io::Error),

    /// The tool exited non-zero.
    #[error("offset tool exited with {status}: {output}")]
    Failed {
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Captured stdout followed by stderr.
        output: String,
    },

    /// The tool did not finish in time and was killed.
    #[error("offset tool did not finish within {:.1}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// Stdout did not start with two floating point numbers.
    #[error("could not parse offsets from tool output {output:?}")]
    Parse {
        /// Raw stdout of the tool.
        output: String,
    },
}

/// Errors from the mount-control interface. Any of them ends the night.
#[derive(Error, Debug)]
pub enum MountError {
    /// The guide command could not be started.
    #[error("failed to launch guide command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The guide command exited non-zero.
    #[error("guide command exited with {status}: {output}")]
    Failed {
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Captured stdout followed by stderr.
        output: String,
    },

    /// The guide command did not finish in time and was killed.
    #[error("guide command did not finish within {:.1}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// The mount refused the correction.
    #[error("mount rejected correction: {0}")]
    Rejected(String),
}

/// Result type for controller operations
pub type GuideResult<T> = Result<T, GuideError>;
