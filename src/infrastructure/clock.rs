//! Clock adapters.
//!
//! See `MockClock` (in `crate::infrastructure::mocks`) for a controllable
//! test clock, available with the `test-helpers` feature or in test builds.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
