//! Listing fetcher
//!
//! This module retrieves one listing page per identifier:
//! - Leasing a session and optionally warming it up on the site root
//! - Classifying every response (success, blocked, transient, not-found)
//! - Backing off on transient failures, rotating sessions on blocks
//! - Optionally pulling the all-offers fragments for the listing
//!
//! Every wait observes the run's cancellation token.

use crate::config::{DetectionConfig, FetchConfig};
use crate::parser::parse_offers_page;
use crate::pipeline::attempt::{AttemptState, AttemptTracker, RetryPolicy};
use crate::pipeline::classify::{classify_response, classify_transport_error, ResponseClass};
use crate::pipeline::throttle::Throttle;
use crate::session::{ReleaseOutcome, SessionHealth, SessionLease, SessionPool};
use reqwest::header::{ACCEPT, REFERER};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::{form_urlencoded, Url};

const ALL_OFFERS_FILTER: &str = r#"{"all":true}"#;
const PRIME_OFFERS_FILTER: &str = r#"{"primeEligible":true}"#;

/// Terminal failure for one identifier
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{identifier}: transient failure after {attempts} attempts: {reason}")]
    Transient {
        identifier: String,
        attempts: u32,
        reason: String,
    },

    #[error("{identifier}: still blocked after {rotations} session rotations")]
    Blocked { identifier: String, rotations: u32 },

    #[error("{identifier}: listing not found")]
    NotFound { identifier: String },

    #[error("{identifier}: cancelled")]
    Cancelled { identifier: String },
}

impl FetchError {
    pub fn identifier(&self) -> &str {
        match self {
            Self::Transient { identifier, .. }
            | Self::Blocked { identifier, .. }
            | Self::NotFound { identifier }
            | Self::Cancelled { identifier } => identifier,
        }
    }
}

/// Raw markup retrieved for one identifier
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub identifier: String,
    pub url: String,
    pub html: String,
    /// All-offers fragment, when offers fetching is enabled and succeeded
    pub offers_html: Option<String>,
    /// Prime-only offers fragment, when the all-offers fragment advertised one
    pub prime_offers_html: Option<String>,
    /// Requests sent, including warm-up and retries
    pub requests: u32,
    pub session_id: u64,
}

/// Retrieves listing pages through leased sessions
pub struct Fetcher {
    pool: SessionPool,
    throttle: Throttle,
    config: FetchConfig,
    detection: DetectionConfig,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

enum Exchange {
    Page(String),
    Failed(ResponseClass),
}

/// Offers fragments plus how the session fared while fetching them
struct OfferFragments {
    all: Option<String>,
    prime: Option<String>,
    outcome: ReleaseOutcome,
}

impl OfferFragments {
    fn none(outcome: ReleaseOutcome) -> Self {
        Self {
            all: None,
            prime: None,
            outcome,
        }
    }
}

impl Fetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `pool` - Sessions to lease from
    /// * `throttle` - Receives a block signal whenever a session is flagged
    /// * `config` - Fetch settings (base URL, retry budget, offers)
    /// * `detection` - Response classification heuristics
    /// * `cancel` - Run-wide stop signal
    pub fn new(
        pool: SessionPool,
        throttle: Throttle,
        config: FetchConfig,
        detection: DetectionConfig,
        cancel: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            pool,
            throttle,
            config,
            detection,
            policy,
            cancel,
        }
    }

    /// URL of the listing page for an identifier
    pub fn listing_url(&self, identifier: &str) -> String {
        format!("{}/dp/{}", self.base(), identifier)
    }

    /// URL of the offers fragment for an identifier
    ///
    /// The site expects the JSON filter form-encoded inside the query value,
    /// so it ends up encoded twice on the wire.
    pub fn offers_url(&self, identifier: &str, prime_only: bool) -> Result<Url, url::ParseError> {
        let filter = if prime_only {
            PRIME_OFFERS_FILTER
        } else {
            ALL_OFFERS_FILTER
        };
        let filter: String = form_urlencoded::byte_serialize(filter.as_bytes()).collect();

        let mut url = Url::parse(&format!("{}/gp/product/ajax", self.base()))?;
        url.query_pairs_mut()
            .append_pair("asin", identifier)
            .append_pair("pc", "dp")
            .append_pair("experienceId", "aodAjaxMain")
            .append_pair("filters", &filter);
        Ok(url)
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Fetches the listing page for one identifier
    ///
    /// Drives the attempt state machine until the page is retrieved or a
    /// budget runs out.
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - Raw listing markup (plus offers fragments when enabled)
    /// * `Err(FetchError)` - Terminal classification for this identifier
    pub async fn fetch(&self, identifier: &str) -> Result<FetchedPage, FetchError> {
        let url = self.listing_url(identifier);
        let mut tracker = AttemptTracker::new(self.policy);
        let mut lease: Option<SessionLease> = None;
        let mut warmed = false;
        let mut last_failure = ResponseClass::Transient("no attempt made".to_string());

        loop {
            match tracker.state() {
                AttemptState::Pending => {
                    let leased = self
                        .until_cancelled(identifier, self.pool.lease())
                        .await?
                        .map_err(|_| FetchError::Cancelled {
                            identifier: identifier.to_string(),
                        })?;
                    tracing::debug!("{}: leased session {}", identifier, leased.id());
                    lease = Some(leased);
                    warmed = false;
                    tracker.leased();
                }

                AttemptState::Fetching => {
                    let Some(session) = lease.as_ref() else {
                        tracker.rotated();
                        continue;
                    };

                    if self.config.warm_up && !warmed && session.health() == SessionHealth::Fresh {
                        warmed = true;
                        tracker.request_sent();
                        let root = format!("{}/", self.base());
                        let warm_up = self
                            .until_cancelled(identifier, self.exchange(session, &root, None))
                            .await?;
                        if let Exchange::Failed(class) = warm_up {
                            // A missing root page says nothing about the listing.
                            let class = match class {
                                ResponseClass::NotFound => {
                                    ResponseClass::Transient("warm-up page not found".to_string())
                                }
                                other => other,
                            };
                            tracing::debug!(
                                "{}: warm-up on session {} failed: {:?}",
                                identifier,
                                session.id(),
                                class
                            );
                            last_failure =
                                self.apply_failure(identifier, class, &mut tracker, &mut lease);
                            continue;
                        }
                    }

                    tracker.request_sent();
                    let exchange = self
                        .until_cancelled(identifier, self.exchange(session, &url, None))
                        .await?;
                    match exchange {
                        Exchange::Page(html) => {
                            tracker.succeeded();
                            let Some(session) = lease.take() else {
                                continue;
                            };

                            let offers = if self.config.fetch_offers {
                                self.fetch_offers(identifier, &session, &url, &mut tracker)
                                    .await?
                            } else {
                                OfferFragments::none(ReleaseOutcome::Ok)
                            };

                            let session_id = session.id();
                            if offers.outcome == ReleaseOutcome::Blocked {
                                self.throttle.record_block();
                            }
                            self.pool.release(session, offers.outcome);
                            tracing::debug!(
                                "{}: fetched listing in {} requests",
                                identifier,
                                tracker.requests()
                            );

                            return Ok(FetchedPage {
                                identifier: identifier.to_string(),
                                url,
                                html,
                                offers_html: offers.all,
                                prime_offers_html: offers.prime,
                                requests: tracker.requests(),
                                session_id,
                            });
                        }
                        Exchange::Failed(class) => {
                            last_failure =
                                self.apply_failure(identifier, class, &mut tracker, &mut lease);
                        }
                    }
                }

                AttemptState::Backoff(delay) => {
                    tracing::debug!(
                        "{}: backing off {:?} after transient failure {}",
                        identifier,
                        delay,
                        tracker.transient_failures()
                    );
                    self.until_cancelled(identifier, tokio::time::sleep(delay))
                        .await?;
                    tracker.backoff_elapsed();
                }

                AttemptState::Rotating => {
                    tracing::debug!(
                        "{}: rotating session (rotation {})",
                        identifier,
                        tracker.rotations()
                    );
                    tracker.rotated();
                }

                AttemptState::Succeeded => {
                    // Success returns from inside `Fetching`.
                    return Err(FetchError::Transient {
                        identifier: identifier.to_string(),
                        attempts: tracker.requests(),
                        reason: "attempt ended without a page".to_string(),
                    });
                }

                AttemptState::Failed => {
                    return Err(self.terminal_error(identifier, &tracker, last_failure, lease));
                }
            }
        }
    }

    /// Applies a failed exchange to the state machine and the session lease
    ///
    /// Returns the classification so the terminal error can report it.
    fn apply_failure(
        &self,
        identifier: &str,
        class: ResponseClass,
        tracker: &mut AttemptTracker,
        lease: &mut Option<SessionLease>,
    ) -> ResponseClass {
        match &class {
            ResponseClass::Blocked(reason) => {
                tracing::warn!("{}: session blocked ({})", identifier, reason);
                if let Some(session) = lease.take() {
                    self.pool.release(session, ReleaseOutcome::Blocked);
                }
                self.throttle.record_block();
                tracker.blocked();
            }
            ResponseClass::NotFound => {
                tracker.not_found();
            }
            ResponseClass::Transient(reason) => {
                tracing::debug!("{}: transient failure ({})", identifier, reason);
                tracker.transient_failure();
            }
            ResponseClass::Success => {
                tracker.succeeded();
            }
        }
        class
    }

    /// Builds the terminal error and hands back any session still leased
    fn terminal_error(
        &self,
        identifier: &str,
        tracker: &AttemptTracker,
        last_failure: ResponseClass,
        lease: Option<SessionLease>,
    ) -> FetchError {
        let identifier = identifier.to_string();

        let error = match last_failure {
            ResponseClass::NotFound => {
                if let Some(session) = lease {
                    self.pool.release(session, ReleaseOutcome::Ok);
                }
                FetchError::NotFound { identifier }
            }
            ResponseClass::Blocked(_) => FetchError::Blocked {
                identifier,
                rotations: tracker.rotations(),
            },
            ResponseClass::Transient(reason) => {
                if let Some(session) = lease {
                    self.pool.release(session, ReleaseOutcome::Error);
                }
                FetchError::Transient {
                    identifier,
                    attempts: tracker.requests(),
                    reason,
                }
            }
            ResponseClass::Success => FetchError::Transient {
                identifier,
                attempts: tracker.requests(),
                reason: "attempt ended without a page".to_string(),
            },
        };

        match &error {
            FetchError::NotFound { .. } => tracing::info!("{}", error),
            _ => tracing::warn!("{}", error),
        }
        error
    }

    /// Retrieves the offers fragments with the session that fetched the listing
    ///
    /// Failures are logged and leave the offers absent; only cancellation
    /// propagates. A blocked fragment flags the session for retirement.
    async fn fetch_offers(
        &self,
        identifier: &str,
        session: &SessionLease,
        listing_url: &str,
        tracker: &mut AttemptTracker,
    ) -> Result<OfferFragments, FetchError> {
        let all_url = match self.offers_url(identifier, false) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("{}: cannot build offers URL: {}", identifier, e);
                return Ok(OfferFragments::none(ReleaseOutcome::Ok));
            }
        };

        tracker.request_sent();
        let exchange = self
            .until_cancelled(identifier, self.exchange(session, all_url.as_str(), Some(listing_url)))
            .await?;
        let all = match exchange {
            Exchange::Page(html) => html,
            Exchange::Failed(class) => {
                let outcome = offers_failure(identifier, session, "offers", &class);
                return Ok(OfferFragments::none(outcome));
            }
        };

        if !parse_offers_page(&all).has_prime_filter {
            tracing::debug!("{}: no Prime filter offered", identifier);
            return Ok(OfferFragments {
                all: Some(all),
                prime: None,
                outcome: ReleaseOutcome::Ok,
            });
        }

        let prime_url = match self.offers_url(identifier, true) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("{}: cannot build Prime offers URL: {}", identifier, e);
                return Ok(OfferFragments {
                    all: Some(all),
                    prime: None,
                    outcome: ReleaseOutcome::Ok,
                });
            }
        };

        tracker.request_sent();
        let exchange = self
            .until_cancelled(
                identifier,
                self.exchange(session, prime_url.as_str(), Some(listing_url)),
            )
            .await?;
        let (prime, outcome) = match exchange {
            Exchange::Page(html) => (Some(html), ReleaseOutcome::Ok),
            Exchange::Failed(class) => (
                None,
                offers_failure(identifier, session, "Prime offers", &class),
            ),
        };

        Ok(OfferFragments {
            all: Some(all),
            prime,
            outcome,
        })
    }

    /// Sends one GET and classifies the result
    async fn exchange(&self, session: &SessionLease, url: &str, referer: Option<&str>) -> Exchange {
        let mut request = session.client().get(url);
        if let Some(referer) = referer {
            request = request
                .header(REFERER, referer)
                .header(ACCEPT, "text/html,*/*")
                .header("x-requested-with", "XMLHttpRequest");
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Exchange::Failed(classify_transport_error(&e)),
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Exchange::Failed(classify_transport_error(&e)),
        };

        match classify_response(status, &body, &self.detection) {
            ResponseClass::Success => Exchange::Page(body),
            class => Exchange::Failed(class),
        }
    }

    /// Runs `future` unless the stop signal fires first
    async fn until_cancelled<F: Future>(
        &self,
        identifier: &str,
        future: F,
    ) -> Result<F::Output, FetchError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled {
                identifier: identifier.to_string(),
            }),
            output = future => Ok(output),
        }
    }
}

/// Logs a failed offers fragment and picks how to release the session
fn offers_failure(
    identifier: &str,
    session: &SessionLease,
    fragment: &str,
    class: &ResponseClass,
) -> ReleaseOutcome {
    match class {
        ResponseClass::Blocked(reason) => {
            tracing::warn!(
                "{}: session {} blocked on {} fragment ({})",
                identifier,
                session.id(),
                fragment,
                reason
            );
            ReleaseOutcome::Blocked
        }
        other => {
            tracing::warn!("{}: {} fragment unavailable: {:?}", identifier, fragment, other);
            ReleaseOutcome::Ok
        }
    }
}
