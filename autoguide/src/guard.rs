//! Safety ceiling on guide corrections and dispatch to the mount.

use crate::error::MountError;
use crate::mount::MountControl;
use crate::offset::PixelOffset;

/// An offset judged against the correction ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetMeasurement {
    pub dx: f64,
    pub dy: f64,
    /// Both components strictly below the ceiling
    pub within_safe_limit: bool,
}

/// Fixed ceiling on the size of a single correction
#[derive(Debug, Clone, Copy)]
pub struct CorrectionGuard {
    max_correction: f64,
}

impl CorrectionGuard {
    pub fn new(max_correction: f64) -> Self {
        Self { max_correction }
    }

    pub fn max_correction(&self) -> f64 {
        self.max_correction
    }

    pub fn assess(&self, offset: PixelOffset) -> OffsetMeasurement {
        OffsetMeasurement {
            dx: offset.dx,
            dy: offset.dy,
            within_safe_limit: offset.magnitude() < self.max_correction,
        }
    }
}

/// What happened to one correction
#[derive(Debug)]
pub enum CorrectionOutcome {
    /// The mount accepted the correction
    Applied,
    /// Dry run: the correction would have been sent
    Simulated,
    /// The offset reached the ceiling and was dropped
    Rejected,
    /// The mount reported failure
    DispatchFailed(MountError),
}

impl CorrectionOutcome {
    /// Whether this correction belongs in the shift log
    pub fn should_log(&self) -> bool {
        matches!(self, Self::Applied | Self::Simulated)
    }
}

/// Applies the ceiling, then forwards surviving offsets to the mount
pub struct Corrector {
    guard: CorrectionGuard,
    mount: Box<dyn MountControl + Send>,
    dry_run: bool,
}

impl Corrector {
    pub fn new(guard: CorrectionGuard, mount: Box<dyn MountControl + Send>, dry_run: bool) -> Self {
        Self {
            guard,
            mount,
            dry_run,
        }
    }

    pub fn guard(&self) -> &CorrectionGuard {
        &self.guard
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn correct(&mut self, measurement: &OffsetMeasurement) -> CorrectionOutcome {
        if !measurement.within_safe_limit {
            log::warn!(
                "Predicted guide correction ({:.6}, {:.6}) >= {} pixels, skipping correction",
                measurement.dx,
                measurement.dy,
                self.guard.max_correction()
            );
            return CorrectionOutcome::Rejected;
        }

        if self.dry_run {
            log::info!(
                "[SIM] Guide correction ({:.2}, {:.2}) applied",
                measurement.dx,
                measurement.dy
            );
            return CorrectionOutcome::Simulated;
        }

        match self.mount.apply_offset(measurement.dx, measurement.dy) {
            Ok(()) => CorrectionOutcome::Applied,
            Err(e) => {
                log::error!("Guide correction failed: {e}");
                CorrectionOutcome::DispatchFailed(e)
            }
        }
    }
}
