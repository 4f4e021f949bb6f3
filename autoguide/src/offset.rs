//! Pixel offsets between a check image and the reference image.
//!
//! The correlation itself is done by an external tool; this module only
//! invokes it and reads the answer.

use crate::config::OffsetToolConfig;
use crate::error::OffsetError;
use crate::process::{run_with_timeout, ProcessOutcome};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Raw shift reported by an offset source, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelOffset {
    pub dx: f64,
    pub dy: f64,
}

impl PixelOffset {
    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Largest absolute component
    pub fn magnitude(&self) -> f64 {
        self.dx.abs().max(self.dy.abs())
    }
}

/// Something that can measure the shift of `check` relative to `reference`
pub trait OffsetSource {
    fn measure(&mut self, check: &Path, reference: &Path) -> Result<PixelOffset, OffsetError>;
}

/// Parse the first two whitespace-separated tokens of `stdout` as `dx dy`
pub fn parse_offsets(stdout: &str) -> Result<PixelOffset, OffsetError> {
    let parse_error = || OffsetError::Parse {
        output: stdout.to_string(),
    };

    let mut tokens = stdout.split_whitespace();
    let dx = tokens
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .ok_or_else(parse_error)?;
    let dy = tokens
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .ok_or_else(parse_error)?;

    if !dx.is_finite() || !dy.is_finite() {
        return Err(parse_error());
    }
    Ok(PixelOffset::new(dx, dy))
}

/// External `pixelshift` correlation tool
///
/// Invoked as `<program> <check><region> <reference><region> <tile_size>`.
/// The check image goes first so the reported shift already points back
/// towards the reference, which is the direction the mount must move.
#[derive(Debug, Clone)]
pub struct PixelShiftTool {
    program: PathBuf,
    region: String,
    tile_size: u32,
    timeout: Duration,
}

impl PixelShiftTool {
    pub fn new(config: &OffsetToolConfig) -> Self {
        Self {
            program: config.program.clone(),
            region: config.region.clone(),
            tile_size: config.tile_size,
            timeout: config.timeout(),
        }
    }

    /// Arguments passed to the tool for one comparison
    pub fn arguments(&self, check: &Path, reference: &Path) -> Vec<OsString> {
        let with_region = |path: &Path| {
            let mut arg = path.as_os_str().to_os_string();
            arg.push(&self.region);
            arg
        };
        vec![
            with_region(check),
            with_region(reference),
            OsString::from(self.tile_size.to_string()),
        ]
    }
}

impl OffsetSource for PixelShiftTool {
    fn measure(&mut self, check: &Path, reference: &Path) -> Result<PixelOffset, OffsetError> {
        let mut command = Command::new(&self.program);
        command.args(self.arguments(check, reference));

        let output = match run_with_timeout(&mut command, self.timeout).map_err(OffsetError::Spawn)? {
            ProcessOutcome::Finished(output) => output,
            ProcessOutcome::TimedOut => return Err(OffsetError::TimedOut(self.timeout)),
        };

        if !output.status.success() {
            return Err(OffsetError::Failed {
                status: output.status,
                output: output.combined(),
            });
        }

        parse_offsets(&output.stdout)
    }
}
