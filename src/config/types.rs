use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Catalog Gleaner
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of sessions the pool keeps available
    pub initial_session_pool_size: u32,

    /// Whether sessions are bound to proxies from `proxies_file`
    pub allow_proxy: bool,

    /// Proxy list, one `ip:port[:username:password]` per line
    pub proxies_file: String,

    /// Grace period for in-flight tasks after a stop signal (seconds)
    pub shutdown_grace_secs: u64,

    pub concurrent_requests_control: ConcurrencyControlConfig,
    pub fetch: FetchConfig,
    pub detection: DetectionConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_session_pool_size: 5,
            allow_proxy: false,
            proxies_file: "proxies.txt".to_string(),
            shutdown_grace_secs: 30,
            concurrent_requests_control: ConcurrencyControlConfig::default(),
            fetch: FetchConfig::default(),
            detection: DetectionConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Concurrency escalation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyControlConfig {
    /// Permits available when a run starts
    pub initial_concurrent: u32,

    /// Interval between escalation ticks (seconds, fractional allowed)
    pub scale_up_delay: f64,

    /// Permits added per escalation tick
    pub scale_increment: u32,

    /// Upper bound for the ceiling; `None` means unbounded
    pub max_concurrent: Option<u32>,

    /// How long a block signal holds escalation (seconds); defaults to one tick
    pub block_hold_window: Option<f64>,
}

impl Default for ConcurrencyControlConfig {
    fn default() -> Self {
        Self {
            initial_concurrent: 3,
            scale_up_delay: 0.0005,
            scale_increment: 2,
            max_concurrent: Some(64),
            block_hold_window: None,
        }
    }
}

/// Longest accepted escalation delay or hold window (seconds)
pub const MAX_DELAY_SECS: f64 = 86_400.0;

impl ConcurrencyControlConfig {
    /// Escalation tick period, never shorter than one nanosecond
    pub fn scale_up_interval(&self) -> Duration {
        seconds_to_duration(self.scale_up_delay).max(Duration::from_nanos(1))
    }

    pub fn hold_window(&self) -> Duration {
        self.block_hold_window
            .map(seconds_to_duration)
            .unwrap_or_else(|| self.scale_up_interval())
    }
}

/// Converts seconds to a `Duration`, clamped to `0..=MAX_DELAY_SECS`
fn seconds_to_duration(secs: f64) -> Duration {
    let max = Duration::from_secs(MAX_DELAY_SECS as u64);
    Duration::try_from_secs_f64(secs)
        .map(|d| d.min(max))
        .unwrap_or(if secs > 0.0 { max } else { Duration::ZERO })
}

/// Listing retrieval settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Site root; listing pages live at `{base_url}/dp/{identifier}`
    pub base_url: String,

    /// Total request timeout (seconds)
    pub timeout_secs: u64,

    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Retry budget per identifier
    ///
    /// Transient failures: at most `max_attempts` requests in total, so
    /// `max_attempts - 1` retries. Blocks: up to `max_attempts` rotations to
    /// a fresh session, so up to `max_attempts + 1` blocked requests. The two
    /// budgets are counted separately.
    pub max_attempts: u32,

    /// First backoff delay (milliseconds)
    pub backoff_base_ms: u64,

    /// Backoff cap (milliseconds)
    pub backoff_max_ms: u64,

    /// Request the site root with a fresh session before its first listing
    pub warm_up: bool,

    /// Also retrieve the all-offers fragment for each listing
    pub fetch_offers: bool,

    /// User agents handed out to new sessions
    pub user_agents: Vec<String>,

    /// Value of the Accept-Language header
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.amazon.in".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            warm_up: true,
            fetch_offers: false,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0".to_string(),
            ],
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Response classification heuristics
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Status codes that mean the session was flagged
    pub blocked_status_codes: Vec<u16>,

    /// Body fragments that identify a challenge page (case-insensitive)
    pub blocked_markers: Vec<String>,

    /// Status codes that mean the listing does not exist
    pub not_found_status_codes: Vec<u16>,

    /// Body fragments that identify a missing-listing page (case-insensitive)
    pub not_found_markers: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blocked_status_codes: vec![403, 429, 503],
            blocked_markers: vec![
                "/errors/validateCaptcha".to_string(),
                "Type the characters you see in this image".to_string(),
                "api-services-support@amazon.com".to_string(),
                "<title>Robot Check</title>".to_string(),
            ],
            not_found_status_codes: vec![404, 410],
            not_found_markers: vec![
                "<title>Page Not Found</title>".to_string(),
                "we couldn't find that page".to_string(),
            ],
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving one JSON document per identifier
    pub directory: String,

    /// Also write `all_products_{timestamp}.csv` once the run ends
    pub combined_csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "output".to_string(),
            combined_csv: true,
        }
    }
}
