//! Blocking subprocess execution with a deadline.
//!
//! The controller loop is synchronous, so the async child is driven to
//! completion here: on the ambient tokio runtime when the caller runs inside
//! one (the daemon runs the loop under `spawn_blocking`), otherwise on a
//! throwaway current-thread runtime. Must not be called from an async task.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};

/// Output of a child that ran to completion
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Stdout followed by stderr, as an operator would see them on a terminal
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text.trim_end().to_string()
    }
}

impl From<Output> for CapturedOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// How a deadline-bound child process ended
#[derive(Debug)]
pub enum ProcessOutcome {
    Finished(CapturedOutput),
    /// The deadline passed before the child exited and closed its output;
    /// the child was killed
    TimedOut,
}

/// Run `command` to completion, killing it if it outlives `timeout`.
///
/// Stdin is closed; stdout and stderr are captured. The deadline covers both
/// the exit and the end of output, so a background grandchild holding the
/// pipes open cannot stretch it.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> std::io::Result<ProcessOutcome> {
    command.stdin(Stdio::null()).kill_on_drop(true);

    let run = async {
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(output) => output.map(|output| ProcessOutcome::Finished(output.into())),
            Err(_) => {
                log::debug!("Child process exceeded {timeout:?}, killing it");
                Ok(ProcessOutcome::TimedOut)
            }
        }
    };

    match Handle::try_current() {
        Ok(handle) => handle.block_on(run),
        Err(_) => Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(run),
    }
}
