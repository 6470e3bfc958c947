//! Monthly counting windows and the keys that address them.
//!
//! A counter lives under `"<scope>:<YYYY-MM>:<digest>"`. When the calendar
//! month changes the label changes with it, so the next request lands on a
//! fresh key and the old counter is simply left to expire.

use crate::domain::identity::AnonymousIdentity;
use chrono::{DateTime, Datelike, Utc};
use std::fmt;

/// Scope prefix used for anonymous chat counters.
pub const DEFAULT_SCOPE: &str = "anon_quota";

/// One calendar month, the unit a quota is counted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthWindow {
    year: i32,
    month: u32,
}

impl MonthWindow {
    /// The window containing `at`, evaluated in UTC.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Build a window from its parts. Returns `None` for a month outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The `YYYY-MM` label written into counter keys.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MonthWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Address of one usage counter in the shared store.
///
/// Unique per `(scope, window, identity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    scope: String,
    window: MonthWindow,
    identity: AnonymousIdentity,
}

impl UsageKey {
    pub fn new(scope: impl Into<String>, window: MonthWindow, identity: AnonymousIdentity) -> Self {
        Self {
            scope: scope.into(),
            window,
            identity,
        }
    }

    /// Key in the default `anon_quota` scope.
    pub fn anonymous(window: MonthWindow, identity: AnonymousIdentity) -> Self {
        Self::new(DEFAULT_SCOPE, window, identity)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn window(&self) -> MonthWindow {
        self.window
    }

    pub fn identity(&self) -> &AnonymousIdentity {
        &self.identity
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope, self.window, self.identity)
    }
}
