//! Mock clock for testing.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Manually driven wall clock.
///
/// Lets tests cross month boundaries and counter expiries without waiting.
/// Clones share the same time, so advancing one advances all of them.
///
/// ```
/// use anon_quota::infrastructure::mocks::MockClock;
/// use anon_quota::application::ports::Clock;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap();
/// let clock = MockClock::new(start);
///
/// clock.advance(Duration::minutes(2));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2025, 2, 1, 0, 1, 0).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward (or backward, with a negative delta).
    pub fn advance(&self, delta: chrono::Duration) {
        let mut time = self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut time = self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time = at;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}
