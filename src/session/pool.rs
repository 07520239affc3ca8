//! Bounded pool of network identities
//!
//! The pool keeps `size` leasable sessions. Leasing waits when every session is
//! out; releasing with [`ReleaseOutcome::Blocked`] retires the session and
//! provisions its replacement before returning, so the available count is
//! restored to the floor immediately.

use crate::config::{Config, FetchConfig};
use crate::session::health::{ReleaseOutcome, SessionHealth};
use crate::session::identity::Session;
use crate::session::proxy::{load_proxies, pick_proxy, ProxyEndpoint};
use crate::GleanError;
use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Semaphore;

/// The pool was closed while waiting for a session
#[derive(Debug, Clone, Copy, Error)]
#[error("session pool is closed")]
pub struct PoolClosed;

/// A session that has left rotation
#[derive(Debug, Clone)]
pub struct RetiredSession {
    pub id: u64,
    pub identity: String,
    pub use_count: u64,
    pub proxy: Option<String>,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub available: usize,
    pub leased: usize,
    pub retired: usize,
    pub replacements: u64,
}

/// Pool of leasable sessions
///
/// Cloning the pool is cheap and yields another handle to the same sessions.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// One permit per idle session
    idle_permits: Semaphore,
    fetch: FetchConfig,
    proxies: Vec<ProxyEndpoint>,
}

struct PoolState {
    /// Least recently used at the front
    idle: VecDeque<Session>,
    leased: HashSet<u64>,
    retired: Vec<RetiredSession>,
    next_id: u64,
    replacements: u64,
}

impl SessionPool {
    /// Creates a pool of `size` sessions
    ///
    /// When `proxies` is non-empty every session is bound to a proxy drawn at
    /// random from it.
    pub fn new(
        size: usize,
        fetch: &FetchConfig,
        proxies: Vec<ProxyEndpoint>,
    ) -> Result<Self, GleanError> {
        let mut idle = VecDeque::with_capacity(size);
        for id in 0..size as u64 {
            let session = Session::build(id, fetch, pick_proxy(&proxies))?;
            tracing::debug!(
                "Initialized session {} ({})",
                session.id(),
                describe_proxy(&session)
            );
            idle.push_back(session);
        }

        tracing::info!(
            "Session pool initialized with {} sessions ({} proxies available)",
            size,
            proxies.len()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle,
                    leased: HashSet::new(),
                    retired: Vec::new(),
                    next_id: size as u64,
                    replacements: 0,
                }),
                idle_permits: Semaphore::new(size),
                fetch: fetch.clone(),
                proxies,
            }),
        })
    }

    /// Creates the pool described by the configuration
    pub fn from_config(config: &Config) -> Result<Self, GleanError> {
        let proxies = if config.allow_proxy {
            load_proxies(Path::new(&config.proxies_file))
        } else {
            tracing::info!("Proxy use disabled in config");
            Vec::new()
        };

        Self::new(
            config.initial_session_pool_size as usize,
            &config.fetch,
            proxies,
        )
    }

    /// Leases the least recently used available session
    ///
    /// Waits while every session is leased out. Fails only after [`close`](Self::close).
    pub async fn lease(&self) -> Result<SessionLease, PoolClosed> {
        let permit = self
            .shared
            .idle_permits
            .acquire()
            .await
            .map_err(|_| PoolClosed)?;
        permit.forget();

        let mut state = self.shared.lock();
        let session = state.idle.pop_front().ok_or(PoolClosed)?;
        state.leased.insert(session.id());
        drop(state);

        tracing::trace!("Leased session {}", session.id());
        Ok(SessionLease {
            session: Some(session),
            pool: Arc::clone(&self.shared),
        })
    }

    /// Returns a leased session with the outcome of its last request
    pub fn release(&self, mut lease: SessionLease, outcome: ReleaseOutcome) {
        if let Some(session) = lease.session.take() {
            self.shared.return_session(session, outcome);
        }
    }

    /// Wakes every waiting `lease()` call with an error
    pub fn close(&self) {
        self.shared.idle_permits.close();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.shared.lock();
        PoolSnapshot {
            available: state.idle.len(),
            leased: state.leased.len(),
            retired: state.retired.len(),
            replacements: state.replacements,
        }
    }

    /// Sessions that have been retired so far, oldest first
    pub fn retired(&self) -> Vec<RetiredSession> {
        self.shared.lock().retired.clone()
    }
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the queue half-updated,
        // so a poisoned lock is still usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn return_session(&self, mut session: Session, outcome: ReleaseOutcome) {
        let mut state = self.lock();
        state.leased.remove(&session.id());

        match outcome {
            ReleaseOutcome::Ok => {
                session.record_success();
                state.idle.push_back(session);
                self.idle_permits.add_permits(1);
            }
            ReleaseOutcome::Error => {
                state.idle.push_back(session);
                self.idle_permits.add_permits(1);
            }
            ReleaseOutcome::Blocked => {
                session.set_health(SessionHealth::Blocked);
                tracing::warn!(
                    "Session {} blocked after {} uses ({}), retiring",
                    session.id(),
                    session.use_count(),
                    describe_proxy(&session)
                );
                session.set_health(SessionHealth::Retired);
                state.retired.push(RetiredSession {
                    id: session.id(),
                    identity: session.identity().to_string(),
                    use_count: session.use_count(),
                    proxy: session.proxy().map(|p| p.to_string()),
                });

                let replacement_id = state.next_id;
                state.next_id += 1;
                match self.build_replacement(replacement_id) {
                    Some(replacement) => {
                        tracing::info!(
                            "Session {} replaced by session {} ({})",
                            session.id(),
                            replacement.id(),
                            describe_proxy(&replacement)
                        );
                        state.replacements += 1;
                        state.idle.push_back(replacement);
                        self.idle_permits.add_permits(1);
                    }
                    None => {
                        tracing::error!(
                            "Could not replace session {}, pool shrinks to {} sessions",
                            session.id(),
                            state.idle.len() + state.leased.len()
                        );
                    }
                }
            }
        }
    }

    /// Builds a replacement identity, retrying without a proxy if binding fails
    fn build_replacement(&self, id: u64) -> Option<Session> {
        match Session::build(id, &self.fetch, pick_proxy(&self.proxies)) {
            Ok(session) => Some(session),
            Err(e) if !self.proxies.is_empty() => {
                tracing::warn!("Replacement session {} failed with proxy: {}", id, e);
                Session::build(id, &self.fetch, None).ok()
            }
            Err(e) => {
                tracing::error!("Replacement session {} failed: {}", id, e);
                None
            }
        }
    }
}

fn describe_proxy(session: &Session) -> String {
    session
        .proxy()
        .map(|p| format!("proxy {}", p))
        .unwrap_or_else(|| "direct".to_string())
}

/// Exclusive use of one session
///
/// Dropping a lease without [`SessionPool::release`] returns the session with
/// [`ReleaseOutcome::Error`], so cancelled tasks never leak identities.
pub struct SessionLease {
    session: Option<Session>,
    pool: Arc<PoolShared>,
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only `release` and `drop` take the session, and both consume the lease.
        self.session
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease accessed after release"))
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!("Session {} returned by dropped lease", session.id());
            self.pool.return_session(session, ReleaseOutcome::Error);
        }
    }
}
