//! Harvest coordinator - run orchestration
//!
//! This module ties the pipeline stages together:
//! - Admitting identifiers in input order as throttle permits free up
//! - Running fetch, parse, assemble and write for each identifier as a task
//! - Escalating concurrency in the background for the length of the run
//! - Stopping admission on the stop signal and aborting stragglers after
//!   the grace period
//! - Counting every outcome into a [`RunSummary`]

use crate::config::Config;
use crate::identifier::dedupe_identifiers;
use crate::parser::{parse_offer_fragments, parse_page};
use crate::pipeline::fetcher::{FetchError, Fetcher};
use crate::pipeline::throttle::Throttle;
use crate::record::{assemble_record, RecordWriter, RunSummary};
use crate::session::SessionPool;
use crate::GleanError;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How one identifier ended
#[derive(Debug)]
enum TaskOutcome {
    Written,
    NotFound,
    Blocked,
    Transient,
    Cancelled,
    WriteFailed,
}

impl From<&FetchError> for TaskOutcome {
    fn from(error: &FetchError) -> Self {
        match error {
            FetchError::Transient { .. } => Self::Transient,
            FetchError::Blocked { .. } => Self::Blocked,
            FetchError::NotFound { .. } => Self::NotFound,
            FetchError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

/// Run context owning the session pool, the throttle and the record writer
pub struct Harvester {
    config: Arc<Config>,
    pool: SessionPool,
    throttle: Throttle,
    fetcher: Arc<Fetcher>,
    writer: Arc<dyn RecordWriter>,
    cancel: CancellationToken,
}

impl Harvester {
    /// Creates a harvester with a session pool built from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `writer` - Destination for assembled records
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(GleanError)` - A session could not be built
    pub fn new(config: Config, writer: Arc<dyn RecordWriter>) -> Result<Self, GleanError> {
        let pool = SessionPool::from_config(&config)?;
        Ok(Self::with_pool(config, pool, writer))
    }

    /// Creates a harvester around an existing session pool
    pub fn with_pool(config: Config, pool: SessionPool, writer: Arc<dyn RecordWriter>) -> Self {
        let cancel = CancellationToken::new();
        let throttle = Throttle::new(&config.concurrent_requests_control);
        let fetcher = Fetcher::new(
            pool.clone(),
            throttle.clone(),
            config.fetch.clone(),
            config.detection.clone(),
            cancel.clone(),
        );

        Self {
            config: Arc::new(config),
            pool,
            throttle,
            fetcher: Arc::new(fetcher),
            writer,
            cancel,
        }
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Harvests every identifier once
    ///
    /// Duplicates are dropped (first occurrence wins). Per-identifier
    /// failures never stop the run; they are logged and counted.
    ///
    /// # Arguments
    ///
    /// * `identifiers` - Identifiers in admission order
    ///
    /// # Returns
    ///
    /// Outcome counts for the run, accounting for every unique identifier.
    pub async fn run<I, S>(&self, identifiers: I) -> RunSummary
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identifiers = dedupe_identifiers(identifiers);
        let mut summary = RunSummary {
            total: identifiers.len(),
            ..RunSummary::default()
        };

        tracing::info!(
            "Starting harvest of {} identifiers (initial concurrency {})",
            summary.total,
            self.throttle.ceiling()
        );
        let start_time = std::time::Instant::now();

        let run_token = self.cancel.child_token();
        let escalator = self.throttle.spawn_escalator(run_token.clone());

        let mut tasks = JoinSet::new();
        let mut admitted = 0;
        let mut finished = 0;

        for identifier in identifiers {
            while let Some(joined) = tasks.try_join_next() {
                self.finish_task(&mut summary, joined, &mut finished, start_time);
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.throttle.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::warn!("Admission stopped: {}", e);
                        break;
                    }
                },
            };
            admitted += 1;

            let fetcher = Arc::clone(&self.fetcher);
            let writer = Arc::clone(&self.writer);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let outcome = harvest_one(&fetcher, writer, &cancel, &identifier).await;
                permit.release();
                outcome
            });
        }

        let not_admitted = summary.total - admitted;
        if not_admitted > 0 {
            tracing::warn!("Stop signal received, {} identifiers not started", not_admitted);
            summary.cancelled += not_admitted;
        }

        self.drain(&mut tasks, &mut summary, &mut finished, start_time)
            .await;

        run_token.cancel();
        if let Err(e) = escalator.await {
            tracing::debug!("Escalator task ended abnormally: {}", e);
        }

        summary.final_ceiling = self.throttle.ceiling();
        summary.sessions_retired = self.pool.snapshot().retired;

        tracing::info!(
            "Harvest complete: {} of {} written in {:.1}s",
            summary.written,
            summary.total,
            start_time.elapsed().as_secs_f64()
        );
        summary
    }

    /// Waits for admitted tasks, aborting them once the grace period ends
    async fn drain(
        &self,
        tasks: &mut JoinSet<TaskOutcome>,
        summary: &mut RunSummary,
        finished: &mut usize,
        start_time: std::time::Instant,
    ) {
        let grace = self.config.shutdown_grace();
        let mut deadline: Option<Instant> = None;
        let mut aborted = false;

        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    self.finish_task(summary, joined, finished, start_time);
                }
                _ = self.cancel.cancelled(), if deadline.is_none() => {
                    tracing::info!(
                        "Stop signal received, waiting up to {:?} for {} tasks",
                        grace,
                        tasks.len()
                    );
                    deadline = Some(Instant::now() + grace);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() && !aborted =>
                {
                    tracing::warn!("Grace period elapsed, aborting {} tasks", tasks.len());
                    tasks.abort_all();
                    aborted = true;
                }
            }
        }
    }

    /// Counts one finished task and logs progress every ten completions
    fn finish_task(
        &self,
        summary: &mut RunSummary,
        joined: Result<TaskOutcome, JoinError>,
        finished: &mut usize,
        start_time: std::time::Instant,
    ) {
        tally(summary, joined);
        *finished += 1;

        if *finished % 10 == 0 {
            let rate = *finished as f64 / start_time.elapsed().as_secs_f64();
            tracing::info!(
                "Progress: {} identifiers finished, {} in flight, ceiling {}, {:.2}/sec",
                finished,
                self.throttle.in_flight(),
                self.throttle.ceiling(),
                rate
            );
        }
    }
}

/// Runs one identifier through fetch, parse, assemble and write
async fn harvest_one(
    fetcher: &Fetcher,
    writer: Arc<dyn RecordWriter>,
    cancel: &CancellationToken,
    identifier: &str,
) -> TaskOutcome {
    let page = match fetcher.fetch(identifier).await {
        Ok(page) => page,
        Err(e) => return TaskOutcome::from(&e),
    };
    let captured_at = Utc::now();

    let mut sections = parse_page(&page.html);
    if let Some(all) = page.offers_html.as_deref() {
        if let Some(offers) = parse_offer_fragments(all, page.prime_offers_html.as_deref()) {
            sections.offers = Some(offers);
        }
    }
    tracing::debug!(
        "{}: extracted {} sections from {}",
        identifier,
        sections.present_count(),
        page.url
    );

    let record = assemble_record(identifier, captured_at, sections);

    if cancel.is_cancelled() {
        tracing::info!("{}: stop signal received, record not written", identifier);
        return TaskOutcome::Cancelled;
    }

    match tokio::task::spawn_blocking(move || writer.write(&record)).await {
        Ok(Ok(path)) => {
            tracing::info!("{}: wrote {}", identifier, path.display());
            TaskOutcome::Written
        }
        Ok(Err(e)) => {
            tracing::error!("{}: {}", identifier, e);
            TaskOutcome::WriteFailed
        }
        Err(e) => {
            tracing::error!("{}: writer task failed: {}", identifier, e);
            TaskOutcome::WriteFailed
        }
    }
}

fn tally(summary: &mut RunSummary, joined: Result<TaskOutcome, JoinError>) {
    match joined {
        Ok(TaskOutcome::Written) => summary.written += 1,
        Ok(TaskOutcome::NotFound) => summary.not_found += 1,
        Ok(TaskOutcome::Blocked) => summary.blocked += 1,
        Ok(TaskOutcome::Transient) => summary.transient += 1,
        Ok(TaskOutcome::Cancelled) => summary.cancelled += 1,
        Ok(TaskOutcome::WriteFailed) => summary.write_failures += 1,
        Err(e) if e.is_cancelled() => summary.cancelled += 1,
        Err(e) => {
            tracing::error!("Harvest task panicked: {}", e);
            summary.transient += 1;
        }
    }
}
