//! Admission outcomes.

use crate::domain::window::MonthWindow;
use serde::Serialize;
use std::fmt;

/// Reason code for an anonymous caller over this month's quota.
pub const ANONYMOUS_LIMIT_REACHED: &str = "ANONYMOUS_LIMIT_REACHED";

/// Reason code for an authenticated caller refused by policy.
pub const AUTHENTICATED_POLICY_REFUSED: &str = "AUTHENTICATED_POLICY_REFUSED";

/// Response header that lets downstream layers spot a denial without parsing the body.
pub const STATUS_HEADER: &str = "X-Chat-Status";

/// Value of [`STATUS_HEADER`] when the anonymous quota is spent.
pub const STATUS_HEADER_VALUE: &str = "anonymous_limit_reached";

/// Value of [`STATUS_HEADER`] when the authenticated policy refuses.
pub const POLICY_REFUSED_HEADER_VALUE: &str = "authenticated_policy_refused";

/// HTTP status carried by a denial (Forbidden).
pub const DENIAL_STATUS: u16 = 403;

/// How a request was classified while deciding admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The request shape asked for the administrative bypass.
    AdminBypass,
    /// Counted against the anonymous monthly quota.
    Anonymous,
    /// Identified caller; not counted.
    Authenticated,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::AdminBypass => "admin_bypass",
            Classification::Anonymous => "anonymous",
            Classification::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one request.
///
/// Serializes as `{"allowed": true, "user_type": "anonymous"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    #[serde(rename = "user_type")]
    pub classification: Classification,
}

impl AdmissionDecision {
    pub fn allow(classification: Classification) -> Self {
        Self {
            allowed: true,
            classification,
        }
    }

    pub fn deny(classification: Classification) -> Self {
        Self {
            allowed: false,
            classification,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Anonymous caller has spent `limit` requests this month.
    AnonymousLimitReached { limit: u64 },
    /// A custom authenticated policy said no.
    PolicyRefused,
}

/// Signal returned to the caller when a request is refused.
///
/// Not a fault: for anonymous callers it is the expected outcome once the
/// monthly budget is spent. Callers translate it into a 403 with
/// [`STATUS_HEADER`] set to the value matching the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    window: MonthWindow,
    reason: DenialReason,
}

impl QuotaDenial {
    /// Anonymous caller over `limit` in `window`.
    pub fn new(window: MonthWindow, limit: u64) -> Self {
        Self {
            window,
            reason: DenialReason::AnonymousLimitReached { limit },
        }
    }

    /// Authenticated caller refused by policy.
    pub fn policy_refused(window: MonthWindow) -> Self {
        Self {
            window,
            reason: DenialReason::PolicyRefused,
        }
    }

    pub fn reason(&self) -> DenialReason {
        self.reason
    }

    pub fn reason_code(&self) -> &'static str {
        match self.reason {
            DenialReason::AnonymousLimitReached { .. } => ANONYMOUS_LIMIT_REACHED,
            DenialReason::PolicyRefused => AUTHENTICATED_POLICY_REFUSED,
        }
    }

    /// Caller class the refusal applies to.
    pub fn classification(&self) -> Classification {
        match self.reason {
            DenialReason::AnonymousLimitReached { .. } => Classification::Anonymous,
            DenialReason::PolicyRefused => Classification::Authenticated,
        }
    }

    pub fn status(&self) -> u16 {
        DENIAL_STATUS
    }

    /// Header name and value to attach to the rejection.
    pub fn header(&self) -> (&'static str, &'static str) {
        let value = match self.reason {
            DenialReason::AnonymousLimitReached { .. } => STATUS_HEADER_VALUE,
            DenialReason::PolicyRefused => POLICY_REFUSED_HEADER_VALUE,
        };
        (STATUS_HEADER, value)
    }

    /// Window the request fell in.
    pub fn window(&self) -> MonthWindow {
        self.window
    }

    /// Limit in force when an anonymous request was denied.
    pub fn limit(&self) -> Option<u64> {
        match self.reason {
            DenialReason::AnonymousLimitReached { limit } => Some(limit),
            DenialReason::PolicyRefused => None,
        }
    }
}

impl fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            DenialReason::AnonymousLimitReached { limit } => write!(
                f,
                "{}: anonymous limit of {} requests reached for {}",
                ANONYMOUS_LIMIT_REACHED, limit, self.window
            ),
            DenialReason::PolicyRefused => write!(
                f,
                "{}: authenticated caller refused by policy",
                AUTHENTICATED_POLICY_REFUSED
            ),
        }
    }
}

impl std::error::Error for QuotaDenial {}
