//! Wall-clock access for the day/night boundary logic.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time
///
/// The night boundary depends on local wall-clock time while every narrated
/// and logged timestamp is UTC, so both are exposed.
pub trait Clock: Send + Sync {
    /// Local wall-clock time at the observatory
    fn local_now(&self) -> NaiveDateTime;

    /// Current UTC time for log records
    fn utc_now(&self) -> DateTime<Utc>;

    /// True before local noon
    fn is_am(&self) -> bool {
        use chrono::Timelike;
        self.local_now().hour() < 12
    }
}

/// Clock backed by the host's time zone settings
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a chosen instant, movable by hand
///
/// Local and UTC time are the same instant in this clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Move the clock to a new instant; clones observe the change.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn local_now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.local_now().and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_am_pm_boundary() {
        let clock = ManualClock::new(at(11));
        assert!(clock.is_am());

        clock.set(at(12));
        assert!(!clock.is_am());

        clock.set(at(0));
        assert!(clock.is_am());
    }

    #[test]
    fn test_clones_follow_updates() {
        let clock = ManualClock::new(at(3));
        let shared = clock.clone();
        clock.set(at(22));
        assert_eq!(shared.local_now(), at(22));
        assert_eq!(shared.utc_now().naive_utc(), at(22));
    }
}
