//! Per-identifier fetch attempt state machine
//!
//! ```text
//! Pending -> Fetching -> Succeeded
//!               |  ^
//!               v  |
//!            Backoff          (transient failure, same session)
//!               |
//! Fetching -> Rotating -> Pending   (blocked, fresh session)
//! any failing transition past its budget -> Failed
//! ```
//!
//! The tracker only decides; the fetcher performs the I/O and the waits.
//! Transient retries and block rotations draw on separate budgets: with
//! `max_attempts = K` a listing gets at most K requests on transient
//! failures, while blocks allow K rotations and so K + 1 blocked requests.

use crate::config::FetchConfig;
use std::time::Duration;

/// Exponential backoff with a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient requests allowed, including the first; also the rotation limit
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retrying after the `failure`-th transient failure (1-based)
    ///
    /// `base * 2^(failure-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, failure: u32) -> Duration {
        let exponent = failure.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Where a fetch task currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Waiting for a session lease
    Pending,
    /// A request is in flight with the leased session
    Fetching,
    /// Sleeping before retrying with the same session
    Backoff(Duration),
    /// The session was blocked and is being swapped for a fresh one
    Rotating,
    Succeeded,
    Failed,
}

/// Tracks attempts and budgets for one identifier
#[derive(Debug, Clone)]
pub struct AttemptTracker {
    state: AttemptState,
    policy: RetryPolicy,
    requests: u32,
    transient_failures: u32,
    rotations: u32,
}

impl AttemptTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: AttemptState::Pending,
            policy,
            requests: 0,
            transient_failures: 0,
            rotations: 0,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Requests sent so far
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn transient_failures(&self) -> u32 {
        self.transient_failures
    }

    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// A session was leased: `Pending -> Fetching`
    pub fn leased(&mut self) -> AttemptState {
        self.transition(AttemptState::Fetching)
    }

    /// A request is about to go out
    pub fn request_sent(&mut self) {
        self.requests += 1;
    }

    /// The page was retrieved: `Fetching -> Succeeded`
    pub fn succeeded(&mut self) -> AttemptState {
        self.transition(AttemptState::Succeeded)
    }

    /// A transient failure: `Fetching -> Backoff`, or `Failed` once the budget is spent
    pub fn transient_failure(&mut self) -> AttemptState {
        self.transient_failures += 1;
        if self.transient_failures >= self.policy.max_attempts {
            return self.transition(AttemptState::Failed);
        }
        let delay = self.policy.backoff_delay(self.transient_failures);
        self.transition(AttemptState::Backoff(delay))
    }

    /// The backoff sleep finished: `Backoff -> Fetching`
    pub fn backoff_elapsed(&mut self) -> AttemptState {
        self.transition(AttemptState::Fetching)
    }

    /// The session was blocked: `Fetching -> Rotating`, or `Failed` after
    /// `max_attempts` rotations
    pub fn blocked(&mut self) -> AttemptState {
        if self.rotations >= self.policy.max_attempts {
            return self.transition(AttemptState::Failed);
        }
        self.rotations += 1;
        self.transition(AttemptState::Rotating)
    }

    /// The blocked session was handed back: `Rotating -> Pending`
    pub fn rotated(&mut self) -> AttemptState {
        self.transition(AttemptState::Pending)
    }

    /// The listing does not exist: `Fetching -> Failed`, no retry
    pub fn not_found(&mut self) -> AttemptState {
        self.transition(AttemptState::Failed)
    }

    fn transition(&mut self, next: AttemptState) -> AttemptState {
        tracing::trace!("Attempt state {:?} -> {:?}", self.state, next);
        self.state = next;
        next
    }
}
