//! Common utilities for autoguide integration tests

use autoguide::clock::ManualClock;
use autoguide::mock::{RecordingMount, ScriptedOffsetSource};
use autoguide::{GuideResult, GuiderConfig, GuiderEvent, NightController, RunOutcome, ShutdownToken};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Give up on a run that never reaches its stop condition
pub const RUN_DEADLINE: Duration = Duration::from_secs(10);

/// Configuration with every wait shrunk to milliseconds
pub fn fast_config(base_dir: &Path) -> GuiderConfig {
    GuiderConfig {
        base_dir: base_dir.to_path_buf(),
        poll_interval_secs: 0.005,
        settle_delay_secs: 0.0,
        idle_timeout_secs: 2.0,
        directory_initial_backoff_secs: 0.0,
        directory_retry_backoff_secs: 0.005,
        ..GuiderConfig::default()
    }
}

pub fn local_time(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// Evening of 2024-03-10, which resolves to night directory `20240310`
pub fn evening() -> ManualClock {
    ManualClock::new(local_time(2024, 3, 10, 21))
}

/// Controller wired to test doubles
pub fn controller(
    config: GuiderConfig,
    source: &ScriptedOffsetSource,
    mount: &RecordingMount,
    clock: &ManualClock,
    shutdown: &ShutdownToken,
) -> NightController {
    NightController::new(config, Box::new(source.clone()), Box::new(mount.clone()))
        .with_clock(Arc::new(clock.clone()))
        .with_shutdown(shutdown.clone())
}

/// Run `controller` until `stop` returns true for the events seen so far
///
/// Returns the run result and every event emitted. A watchdog thread triggers
/// shutdown after [`RUN_DEADLINE`] so a broken test fails instead of hanging.
pub fn run_until<F>(
    controller: &mut NightController,
    shutdown: &ShutdownToken,
    stop: F,
) -> (GuideResult<RunOutcome>, Vec<GuiderEvent>)
where
    F: Fn(&[GuiderEvent]) -> bool + Send + Sync + 'static,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let stop_token = shutdown.clone();
    let callback_id = controller.register_callback(move |event| {
        let mut events = events_clone.lock().unwrap();
        events.push(event.clone());
        if stop(&events) {
            stop_token.trigger();
        }
    });

    let watchdog_token = shutdown.clone();
    let watchdog = std::thread::spawn(move || {
        if watchdog_token.sleep(RUN_DEADLINE) {
            watchdog_token.trigger();
            true
        } else {
            false
        }
    });

    let result = controller.run();
    shutdown.trigger();
    let timed_out = watchdog.join().unwrap();
    controller.deregister_callback(callback_id);

    assert!(!timed_out, "controller run hit the {RUN_DEADLINE:?} deadline");
    let events = events.lock().unwrap().clone();
    (result, events)
}

/// Number of events matching `predicate`
pub fn count(events: &[GuiderEvent], predicate: impl Fn(&GuiderEvent) -> bool) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}
