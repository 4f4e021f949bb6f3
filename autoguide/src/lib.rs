//! AUTOGUIDE - unattended guiding from nightly image directories
//!
//! Night controller state machine for a telescope imaging pipeline. Watches
//! the night's data directory, measures each new frame against a reference
//! frame of the same field and sends small corrections to the mount.
//! States: AwaitingDirectory -> AwaitingFirstImage -> WatchingField -> NightOver

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod mock;
pub mod mount;
pub mod offset;
pub mod process;
pub mod session;
pub mod shift_log;
pub mod shutdown;
pub mod state;
pub mod watcher;

use crate::callback::{CallbackId, GuiderCallback};
use crate::clock::{Clock, SystemClock};
use crate::guard::{CorrectionGuard, CorrectionOutcome, Corrector};
use crate::mount::{mount_from_config, MountControl};
use crate::offset::{OffsetSource, PixelShiftTool};
use crate::session::{resolve_session_date, DirectoryLookup, DirectoryResolver, NightSession};
use crate::shift_log::{LogRecord, ShiftLogger};
use crate::watcher::{newest_image, ImageObservation, ImageWatcher, WatchOutcome};

// Re-export commonly used types for external use
pub use crate::callback::GuiderEvent;
pub use crate::config::GuiderConfig;
pub use crate::error::{GuideError, GuideResult};
pub use crate::shutdown::ShutdownToken;
pub use crate::state::{NightOverReason, NightState, RunOutcome};

/// Result of one state handler: the next state, or `None` when shutdown was
/// requested mid-step
type StepResult = GuideResult<Option<NightState>>;

/// Main night controller state machine
pub struct NightController {
    /// Current state
    state: NightState,
    /// Daemon configuration
    config: GuiderConfig,
    /// Maps wall-clock time to night directories
    resolver: DirectoryResolver,
    /// External correlation tool
    offset_source: Box<dyn OffsetSource + Send>,
    /// Safety ceiling and mount dispatch
    corrector: Corrector,
    /// Wall-clock source
    clock: Arc<dyn Clock>,
    /// Stop flag checked at every polling point
    shutdown: ShutdownToken,
    /// Session in progress, if a directory has been found
    session: Option<NightSession>,
    /// Next directory search targets tomorrow's night
    rollover_requested: bool,
    /// Registered callbacks
    callbacks: Arc<Mutex<HashMap<CallbackId, GuiderCallback>>>,
    /// Next callback ID
    next_callback_id: Arc<Mutex<CallbackId>>,
}

impl NightController {
    /// Create a controller around explicit offset and mount collaborators
    pub fn new(
        config: GuiderConfig,
        offset_source: Box<dyn OffsetSource + Send>,
        mount: Box<dyn MountControl + Send>,
    ) -> Self {
        let corrector = Corrector::new(
            CorrectionGuard::new(config.max_correction),
            mount,
            config.dry_run,
        );
        Self {
            state: NightState::AwaitingDirectory,
            resolver: DirectoryResolver::new(config.base_dir.clone()),
            config,
            offset_source,
            corrector,
            clock: Arc::new(SystemClock),
            shutdown: ShutdownToken::new(),
            session: None,
            rollover_requested: false,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Create a controller using the external tool and mount named in `config`
    pub fn from_config(config: GuiderConfig) -> Self {
        let offset_source = Box::new(PixelShiftTool::new(&config.offset_tool));
        let mount = mount_from_config(&config.mount);
        Self::new(config, offset_source, mount)
    }

    /// Use a different clock (tests pin the time of night)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a shutdown token with a signal handler or test
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Register a callback for controller events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&GuiderEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_callback_id.lock().unwrap();

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Emit an event to all registered callbacks
    fn emit_event(&self, event: &GuiderEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(event);
        }
    }

    /// Get the current state
    pub fn state(&self) -> &NightState {
        &self.state
    }

    /// Session in progress, if any
    pub fn session(&self) -> Option<&NightSession> {
        self.session.as_ref()
    }

    /// Whether the next directory search targets tomorrow's night
    pub fn rollover_requested(&self) -> bool {
        self.rollover_requested
    }

    pub fn config(&self) -> &GuiderConfig {
        &self.config
    }

    /// Run nights back to back until shutdown
    ///
    /// Returns `Err(GuideError::NoImagesTonight)` when a fresh night produces no
    /// image within the idle timeout; that is the only way the loop gives up.
    pub fn run(&mut self) -> GuideResult<RunOutcome> {
        loop {
            if self.shutdown.is_triggered() {
                log::info!("Shutdown requested, stopping guider");
                return Ok(RunOutcome::Shutdown);
            }
            match self.step()? {
                Some(next) => self.state = next,
                None => {
                    log::info!("Shutdown requested, stopping guider");
                    return Ok(RunOutcome::Shutdown);
                }
            }
        }
    }

    /// Execute the handler for the current state once
    fn step(&mut self) -> StepResult {
        use NightState::*;

        match self.state.clone() {
            AwaitingDirectory => self.handle_awaiting_directory(),
            AwaitingFirstImage => self.handle_awaiting_first_image(),
            WatchingField => self.handle_watching_field(),
            NightOver { reason } => {
                log::info!("Session over ({reason}), looking for a data directory");
                Ok(Some(AwaitingDirectory))
            }
        }
    }

    /// Poll for the night directory with backoff
    fn handle_awaiting_directory(&mut self) -> StepResult {
        let mut delay = self.config.directory_initial_backoff();
        log::debug!(
            "Searching for night directories under {}",
            self.resolver.base_dir().display()
        );

        loop {
            if !self.shutdown.sleep(delay) {
                return Ok(None);
            }

            let date = resolve_session_date(self.clock.local_now(), self.rollover_requested);
            match self.resolver.lookup(date) {
                DirectoryLookup::Found(path) => {
                    log::info!("Found data directory: {}", path.display());
                    // The request is spent once the target night is reached
                    self.rollover_requested = false;
                    self.session = Some(NightSession::new(date, path.clone()));
                    self.emit_event(&GuiderEvent::DirectoryFound { date, path });
                    return Ok(Some(NightState::AwaitingFirstImage));
                }
                DirectoryLookup::NotFound(path) => {
                    log::info!(
                        "[{}] No data directory yet at {}",
                        self.clock.utc_now().format("%Y-%m-%d %H:%M:%S"),
                        path.display()
                    );
                    delay = self.config.directory_retry_backoff();
                }
            }
        }
    }

    /// Pick the newest image as reference, waiting for one if the night is empty
    fn handle_awaiting_first_image(&mut self) -> StepResult {
        let Some(directory) = self.session_directory() else {
            return Ok(Some(NightState::AwaitingDirectory));
        };
        let watcher = self.watcher_for(directory);

        let existing = watcher.images()?;
        let (reference, image_count) = match newest_image(&existing) {
            // Count from the same listing so no image slips into the baseline unseen
            Some(newest) => (newest, existing.len()),
            None => {
                log::info!(
                    "No images yet in {}, waiting up to {:.0}s for the first",
                    watcher.directory().display(),
                    self.config.idle_timeout_secs
                );
                match watcher.wait_for_image(None, 0)? {
                    WatchOutcome::NewImage(image) | WatchOutcome::NewFieldDetected(image) => {
                        (image, watcher.image_count()?)
                    }
                    WatchOutcome::TimedOut => {
                        log::error!("No images all night, quitting");
                        return Err(GuideError::NoImagesTonight {
                            waited: self.config.idle_timeout(),
                        });
                    }
                    WatchOutcome::Shutdown => return Ok(None),
                }
            }
        };

        log::info!(
            "Reference image {} (field {}, {image_count} images on disk)",
            reference.name,
            reference.field_identifier
        );
        self.emit_event(&GuiderEvent::ReferenceSelected {
            name: reference.name.clone(),
            field: reference.field_identifier.clone(),
            image_count,
        });
        if let Some(session) = self.session.as_mut() {
            session.reference_image = Some(reference);
            session.image_count_at_reference = image_count;
        }
        Ok(Some(NightState::WatchingField))
    }

    /// Wait for the next image of the field and guide on it
    fn handle_watching_field(&mut self) -> StepResult {
        let Some((directory, reference, baseline)) = self.session.as_ref().and_then(|session| {
            session.reference_image.clone().map(|reference| {
                (
                    session.data_directory.clone(),
                    reference,
                    session.image_count_at_reference,
                )
            })
        }) else {
            return Ok(Some(NightState::AwaitingFirstImage));
        };
        let watcher = self.watcher_for(directory.clone());

        match watcher.wait_for_image(Some(&reference.field_identifier), baseline)? {
            WatchOutcome::Shutdown => Ok(None),
            WatchOutcome::TimedOut => Ok(Some(self.end_session(NightOverReason::IdleTimeout))),
            WatchOutcome::NewFieldDetected(_) => {
                Ok(Some(self.end_session(NightOverReason::FieldChange)))
            }
            WatchOutcome::NewImage(check) => {
                let outcome = self.guide_on(&reference, &check, &directory);

                let image_count = watcher.image_count()?;
                if let Some(session) = self.session.as_mut() {
                    session.image_count_at_reference = image_count;
                }

                if matches!(outcome, Some(CorrectionOutcome::DispatchFailed(_))) {
                    Ok(Some(self.end_session(NightOverReason::DispatchFailed)))
                } else {
                    Ok(Some(NightState::WatchingField))
                }
            }
        }
    }

    /// Measure, guard, dispatch and log one check image
    ///
    /// Returns `None` when the offset could not be measured.
    fn guide_on(
        &mut self,
        reference: &ImageObservation,
        check: &ImageObservation,
        directory: &Path,
    ) -> Option<CorrectionOutcome> {
        if self.config.verbose {
            log::info!("REF: {} CHECK: {}", reference.name, check.name);
        }

        let offset = match self.offset_source.measure(&check.path, &reference.path) {
            Ok(offset) => offset,
            Err(e) => {
                log::warn!("Error calculating offset, skipping correction: {e}");
                self.emit_event(&GuiderEvent::OffsetFailed {
                    check: check.name.clone(),
                    error: e.to_string(),
                });
                return None;
            }
        };

        let measurement = self.corrector.guard().assess(offset);
        let outcome = self.corrector.correct(&measurement);

        if outcome.should_log() {
            let record = LogRecord {
                timestamp: self.clock.utc_now(),
                reference: reference.name.clone(),
                check: check.name.clone(),
                dx: measurement.dx,
                dy: measurement.dy,
            };
            let logger = ShiftLogger::new(self.config.log_path_in(directory));
            if let Err(e) = logger.append(&record) {
                log::error!("Failed to write shift log {}: {e}", logger.path().display());
            }
            self.emit_event(&GuiderEvent::CorrectionApplied {
                reference: record.reference,
                check: record.check,
                dx: measurement.dx,
                dy: measurement.dy,
                simulated: self.corrector.is_dry_run(),
            });
        } else if matches!(outcome, CorrectionOutcome::Rejected) {
            self.emit_event(&GuiderEvent::CorrectionRejected {
                check: check.name.clone(),
                dx: measurement.dx,
                dy: measurement.dy,
            });
        }

        Some(outcome)
    }

    /// Close the current session and decide which night to look for next
    fn end_session(&mut self, reason: NightOverReason) -> NightState {
        if reason.ends_night() {
            // Before noon the night is still "now"; after noon move on to tomorrow
            self.rollover_requested = !self.clock.is_am();
        }
        let field = self
            .session
            .as_ref()
            .and_then(NightSession::field)
            .unwrap_or("none");
        log::info!(
            "Breaking back to directory search from field {field} ({reason}, next night: {})",
            if self.rollover_requested { "tomorrow" } else { "current" }
        );
        self.session = None;
        self.emit_event(&GuiderEvent::NightOver {
            reason,
            rollover_requested: self.rollover_requested,
        });
        NightState::NightOver { reason }
    }

    fn session_directory(&self) -> Option<PathBuf> {
        self.session
            .as_ref()
            .map(|session| session.data_directory.clone())
    }

    fn watcher_for(&self, directory: PathBuf) -> ImageWatcher {
        ImageWatcher::new(
            &self.config,
            directory,
            self.clock.clone(),
            self.shutdown.clone(),
        )
    }
}
