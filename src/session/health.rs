//! Session health definitions
//!
//! Every session moves through `Fresh -> Active -> (Blocked -> Retired)`.
//! Only `Fresh` and `Active` sessions may be leased.

use std::fmt;

/// Represents the current health of a pooled session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionHealth {
    /// Newly created; no request has succeeded with it yet
    Fresh,

    /// Has completed at least one successful request
    Active,

    /// The remote site flagged this identity
    Blocked,

    /// Removed from rotation permanently
    Retired,
}

impl SessionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for SessionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported when a lease is returned to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The request succeeded; the session goes back into rotation
    Ok,

    /// The session was flagged and must be replaced
    Blocked,

    /// The request failed for unrelated reasons; the session is returned unchanged
    Error,
}
