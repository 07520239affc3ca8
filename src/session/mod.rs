//! Session pool module
//!
//! This module manages the pool of network identities used for fetching:
//! - Session health states and release outcomes
//! - Per-session HTTP clients with isolated cookies and optional proxies
//! - Leasing, release, and replacement of blocked sessions

mod health;
mod identity;
mod pool;
mod proxy;

pub use health::{ReleaseOutcome, SessionHealth};
pub use identity::Session;
pub use pool::{PoolClosed, PoolSnapshot, RetiredSession, SessionLease, SessionPool};
pub use proxy::{load_proxies, parse_proxy_list, pick_proxy, ProxyEndpoint};
