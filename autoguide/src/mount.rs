//! Mount-control interface for guide corrections.

use crate::config::MountConfig;
use crate::error::MountError;
use crate::process::{run_with_timeout, ProcessOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Anything that can nudge the telescope by a pixel offset
///
/// An `Err` means the correction did not happen; the controller treats that as
/// the end of the night.
pub trait MountControl {
    fn apply_offset(&mut self, dx: f64, dy: f64) -> Result<(), MountError>;
}

/// Mount that only narrates the corrections it is given
///
/// Used when no guide command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMount;

impl MountControl for ConsoleMount {
    fn apply_offset(&mut self, dx: f64, dy: f64) -> Result<(), MountError> {
        log::info!("Apply guide offset {dx:.6} {dy:.6} (no guide command configured)");
        Ok(())
    }
}

/// Mount driven by an external guide command
///
/// Runs `<program> <args...> <dx> <dy>`; a zero exit status means the mount
/// accepted the correction.
#[derive(Debug, Clone)]
pub struct CommandMount {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandMount {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    /// Build from configuration, `None` if no guide command is set
    pub fn from_config(config: &MountConfig) -> Option<Self> {
        config.guide_command.as_ref().map(|program| {
            Self::new(program.clone(), config.guide_args.clone(), config.timeout())
        })
    }
}

impl MountControl for CommandMount {
    fn apply_offset(&mut self, dx: f64, dy: f64) -> Result<(), MountError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(format!("{dx:.4}"))
            .arg(format!("{dy:.4}"));

        log::debug!("Dispatching guide offset ({dx:.4}, {dy:.4}) via {}", self.program.display());
        match run_with_timeout(&mut command, self.timeout).map_err(MountError::Spawn)? {
            ProcessOutcome::Finished(output) if output.status.success() => Ok(()),
            ProcessOutcome::Finished(output) => Err(MountError::Failed {
                status: output.status,
                output: output.combined(),
            }),
            ProcessOutcome::TimedOut => Err(MountError::TimedOut(self.timeout)),
        }
    }
}

/// Mount selected by configuration: the guide command if set, else narration
pub fn mount_from_config(config: &MountConfig) -> Box<dyn MountControl + Send> {
    match CommandMount::from_config(config) {
        Some(mount) => Box::new(mount),
        None => Box::new(ConsoleMount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_mount_always_succeeds() {
        assert!(ConsoleMount.apply_offset(1.0, -2.0).is_ok());
    }

    #[test]
    fn test_no_command_means_no_command_mount() {
        assert!(CommandMount::from_config(&MountConfig::default()).is_none());
    }

    #[cfg(unix)]
    mod external {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("guide");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_command_receives_args_and_offsets() {
            let dir = tempfile::tempdir().unwrap();
            let record = dir.path().join("calls.txt");
            let program = script(dir.path(), &format!("echo \"$@\" >> {}", record.display()));
            let mut mount = CommandMount::new(
                program,
                vec!["--port".to_string(), "ttyS0".to_string()],
                Duration::from_secs(10),
            );

            mount.apply_offset(1.5, -0.25).unwrap();
            let calls = std::fs::read_to_string(&record).unwrap();
            assert_eq!(calls, "--port ttyS0 1.5000 -0.2500\n");
        }

        #[test]
        fn test_command_failure_is_mount_error() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "echo 'mount not connected' >&2; exit 1");
            let config = MountConfig {
                guide_command: Some(program),
                guide_args: Vec::new(),
                timeout_secs: 10.0,
            };
            let mut mount = CommandMount::from_config(&config).unwrap();
            match mount.apply_offset(1.0, 1.0) {
                Err(MountError::Failed { output, .. }) => assert_eq!(output, "mount not connected"),
                other => panic!("expected failure, got {other:?}"),
            }
        }

        #[test]
        fn test_background_child_cannot_stretch_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "sleep 8 &\nexit 0");
            let mut mount = CommandMount::new(program, Vec::new(), Duration::from_millis(500));
            let start = std::time::Instant::now();
            assert!(matches!(
                mount.apply_offset(1.0, 1.0),
                Err(MountError::TimedOut(_))
            ));
            assert!(start.elapsed() < Duration::from_secs(4));
        }

        #[test]
        fn test_hung_command_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "exec sleep 30");
            let mut mount = CommandMount::new(program, Vec::new(), Duration::from_millis(100));
            assert!(matches!(
                mount.apply_offset(1.0, 1.0),
                Err(MountError::TimedOut(_))
            ));
        }
    }
}
