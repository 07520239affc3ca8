//! Adaptive fetch pipeline
//!
//! This module contains the concurrent core of the harvester:
//! - Throttle: permit-based concurrency ceiling that escalates over time
//! - Classification of responses into success, blocked, transient, not-found
//! - Per-identifier attempt state machine with exponential backoff
//! - Fetcher: leases sessions and drives the state machine
//! - Coordinator: admits identifiers and runs fetch/parse/write tasks

mod attempt;
mod classify;
mod coordinator;
mod fetcher;
mod throttle;

pub use attempt::{AttemptState, AttemptTracker, RetryPolicy};
pub use classify::{classify_response, ResponseClass};
pub use coordinator::Harvester;
pub use fetcher::{FetchError, FetchedPage, Fetcher};
pub use throttle::{Throttle, ThrottleClosed, ThrottlePermit, TickOutcome};
