//! Adaptive concurrency throttle
//!
//! The throttle hands out permits for fetch pipelines. It starts at a
//! conservative ceiling and raises it on a fixed tick while the remote site
//! stays quiet. A block signal holds the ceiling for the rest of the hold
//! window. The ceiling never goes down: lowering it would mean revoking permits
//! that in-flight tasks already own.

use crate::config::ConcurrencyControlConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The throttle was closed while waiting for a permit
#[derive(Debug, Clone, Copy, Error)]
#[error("concurrency throttle is closed")]
pub struct ThrottleClosed;

/// Result of one escalation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Ceiling raised to the contained value
    Raised(usize),
    /// A recent block signal suspended escalation
    Held,
    /// Ceiling already at its configured maximum
    AtMaximum,
}

/// Permit-based concurrency controller
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct Throttle {
    shared: Arc<ThrottleShared>,
}

struct ThrottleShared {
    permits: Arc<Semaphore>,
    state: Mutex<ThrottleState>,
    in_flight: AtomicUsize,
    interval: Duration,
    hold_window: Duration,
}

#[derive(Debug)]
struct ThrottleState {
    ceiling: usize,
    step: usize,
    max: Option<usize>,
    last_scale_up: Instant,
    last_block: Option<Instant>,
    blocks_seen: u64,
}

impl Throttle {
    /// Creates a throttle from the concurrency control settings
    pub fn new(config: &ConcurrencyControlConfig) -> Self {
        let max = config
            .max_concurrent
            .map(|m| (m as usize).min(Semaphore::MAX_PERMITS));
        let initial = (config.initial_concurrent.max(1) as usize)
            .min(max.unwrap_or(Semaphore::MAX_PERMITS));

        Self {
            shared: Arc::new(ThrottleShared {
                permits: Arc::new(Semaphore::new(initial)),
                state: Mutex::new(ThrottleState {
                    ceiling: initial,
                    step: config.scale_increment.max(1) as usize,
                    max,
                    last_scale_up: Instant::now(),
                    last_block: None,
                    blocks_seen: 0,
                }),
                in_flight: AtomicUsize::new(0),
                interval: config.scale_up_interval(),
                hold_window: config.hold_window(),
            }),
        }
    }

    /// Waits for a free permit
    ///
    /// The returned guard gives the permit back when released or dropped.
    pub async fn acquire(&self) -> Result<ThrottlePermit, ThrottleClosed> {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| ThrottleClosed)?;
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        Ok(ThrottlePermit {
            _permit: permit,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Records a block signal from an in-flight fetch
    pub fn record_block(&self) {
        self.record_block_at(Instant::now());
    }

    pub(crate) fn record_block_at(&self, now: Instant) {
        let mut state = self.shared.lock();
        state.last_block = Some(now);
        state.blocks_seen += 1;
        tracing::debug!(
            "Block signal received, holding ceiling at {}",
            state.ceiling
        );
    }

    /// Runs one escalation step as of `now`
    pub fn tick_at(&self, now: Instant) -> TickOutcome {
        let mut state = self.shared.lock();

        if let Some(last_block) = state.last_block {
            if now.saturating_duration_since(last_block) < self.shared.hold_window {
                return TickOutcome::Held;
            }
        }

        let cap = state.max.unwrap_or(Semaphore::MAX_PERMITS);
        let next = state.ceiling.saturating_add(state.step).min(cap);
        if next <= state.ceiling {
            return TickOutcome::AtMaximum;
        }

        // Permits are added under the state lock so the ceiling and the
        // semaphore never disagree for an observer holding the lock.
        self.shared.permits.add_permits(next - state.ceiling);
        state.ceiling = next;
        let since_last = now.saturating_duration_since(state.last_scale_up);
        state.last_scale_up = now;
        tracing::trace!(
            "Concurrency ceiling raised to {} ({:?} after the previous raise)",
            next,
            since_last
        );

        TickOutcome::Raised(next)
    }

    /// Spawns the background escalation task
    ///
    /// The task ticks every `scale_up_delay` until `cancel` fires or the
    /// ceiling reaches its maximum.
    pub fn spawn_escalator(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let throttle = self.clone();
        let period = self.shared.interval;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if throttle.tick_at(Instant::now()) == TickOutcome::AtMaximum {
                            tracing::debug!(
                                "Concurrency ceiling reached maximum of {}",
                                throttle.ceiling()
                            );
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stops handing out permits; waiting `acquire` calls fail
    pub fn close(&self) {
        self.shared.permits.close();
    }

    /// Current permit ceiling
    pub fn ceiling(&self) -> usize {
        self.shared.lock().ceiling
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Number of block signals recorded so far
    pub fn blocks_seen(&self) -> u64 {
        self.shared.lock().blocks_seen
    }
}

impl ThrottleShared {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A permit to run one fetch pipeline
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
    shared: Arc<ThrottleShared>,
}

impl ThrottlePermit {
    /// Returns the permit explicitly
    pub fn release(self) {}
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ThrottlePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlePermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(initial: u32, increment: u32, max: Option<u32>) -> ConcurrencyControlConfig {
        ConcurrencyControlConfig {
            initial_concurrent: initial,
            scale_up_delay: 0.01,
            scale_increment: increment,
            max_concurrent: max,
            block_hold_window: None,
        }
    }

    #[test]
    fn test_ceiling_rises_by_increment_each_tick() {
        let throttle = Throttle::new(&control(3, 2, None));
        let start = Instant::now();

        let mut previous = throttle.ceiling();
        assert_eq!(previous, 3);

        for n in 1..=10u32 {
            let now = start + Duration::from_millis(10 * n as u64);
            assert_eq!(throttle.tick_at(now), TickOutcome::Raised(previous + 2));
            let ceiling = throttle.ceiling();
            assert!(ceiling > previous);
            previous = ceiling;
        }
        assert_eq!(throttle.ceiling(), 23);
    }

    #[test]
    fn test_ceiling_capped_at_maximum() {
        let throttle = Throttle::new(&control(3, 2, Some(6)));
        let now = Instant::now();

        assert_eq!(throttle.tick_at(now), TickOutcome::Raised(5));
        assert_eq!(throttle.tick_at(now), TickOutcome::Raised(6));
        assert_eq!(throttle.tick_at(now), TickOutcome::AtMaximum);
        assert_eq!(throttle.ceiling(), 6);
    }

    #[test]
    fn test_initial_clamped_to_maximum() {
        let throttle = Throttle::new(&control(10, 2, Some(4)));
        assert_eq!(throttle.ceiling(), 4);
    }

    #[test]
    fn test_block_holds_ceiling_within_window() {
        let mut config = control(3, 2, None);
        config.block_hold_window = Some(1.0);
        let throttle = Throttle::new(&config);
        let start = Instant::now();

        throttle.record_block_at(start);
        assert_eq!(
            throttle.tick_at(start + Duration::from_millis(500)),
            TickOutcome::Held
        );
        assert_eq!(throttle.ceiling(), 3);

        // Sustained blocking keeps holding.
        throttle.record_block_at(start + Duration::from_millis(900));
        assert_eq!(
            throttle.tick_at(start + Duration::from_millis(1500)),
            TickOutcome::Held
        );

        assert_eq!(
            throttle.tick_at(start + Duration::from_millis(2000)),
            TickOutcome::Raised(5)
        );
        assert_eq!(throttle.blocks_seen(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_ceiling() {
        let throttle = Throttle::new(&control(2, 1, None));

        let a = throttle.acquire().await.unwrap();
        let _b = throttle.acquire().await.unwrap();
        assert_eq!(throttle.in_flight(), 2);

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(throttle.in_flight() <= throttle.ceiling());

        a.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(throttle.in_flight() <= throttle.ceiling());
    }

    #[tokio::test]
    async fn test_tick_admits_waiting_callers() {
        let throttle = Throttle::new(&control(1, 1, None));
        let _held = throttle.acquire().await.unwrap();

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.acquire().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        throttle.tick_at(Instant::now());
        let admitted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(admitted);
        assert_eq!(throttle.ceiling(), 2);
    }

    #[tokio::test]
    async fn test_escalator_raises_and_stops_on_cancel() {
        let throttle = Throttle::new(&control(1, 1, Some(1000)));
        let cancel = CancellationToken::new();

        let handle = throttle.spawn_escalator(cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let ceiling = throttle.ceiling();
        assert!(ceiling > 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(throttle.ceiling(), ceiling);
    }

    #[tokio::test]
    async fn test_escalator_exits_at_maximum() {
        let throttle = Throttle::new(&control(1, 5, Some(6)));
        let handle = throttle.spawn_escalator(CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(throttle.ceiling(), 6);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let throttle = Throttle::new(&control(1, 1, None));
        let _held = throttle.acquire().await.unwrap();
        throttle.close();
        assert!(throttle.acquire().await.is_err());
    }
}
