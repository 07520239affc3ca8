//! A single network identity
//!
//! Each session owns its own HTTP client, so cookies, user agent and proxy
//! binding never leak between identities.

use crate::config::FetchConfig;
use crate::session::health::SessionHealth;
use crate::session::proxy::ProxyEndpoint;
use crate::GleanError;
use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Instant;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// A pooled network identity
///
/// Sessions are owned by the pool and lent out through leases, so the type is
/// not `Clone`.
#[derive(Debug)]
pub struct Session {
    id: u64,
    identity: String,
    user_agent: String,
    proxy: Option<ProxyEndpoint>,
    health: SessionHealth,
    use_count: u64,
    created_at: DateTime<Utc>,
    last_used: Option<Instant>,
    client: Client,
}

impl Session {
    /// Builds a new session with a fresh cookie jar and identity token
    ///
    /// # Arguments
    ///
    /// * `id` - Pool-unique session number
    /// * `fetch` - Fetch settings (timeouts, user agents, headers)
    /// * `proxy` - Proxy to bind this identity to, if any
    pub fn build(
        id: u64,
        fetch: &FetchConfig,
        proxy: Option<ProxyEndpoint>,
    ) -> Result<Self, GleanError> {
        let user_agent = pick_user_agent(&fetch.user_agents);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        if let Ok(language) = HeaderValue::from_str(&fetch.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, language);
        }

        let mut builder = Client::builder()
            .user_agent(user_agent.clone())
            .default_headers(headers)
            .cookie_provider(Arc::new(Jar::default()))
            .timeout(fetch.timeout())
            .connect_timeout(fetch.connect_timeout())
            .gzip(true)
            .brotli(true);

        if let Some(endpoint) = &proxy {
            let proxy_config = Proxy::all(endpoint.url()).map_err(|e| GleanError::Proxy {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
            builder = builder.proxy(proxy_config);
        }

        let client = builder
            .build()
            .map_err(|source| GleanError::SessionBuild {
                session_id: id,
                source,
            })?;

        Ok(Self {
            id,
            identity: new_identity_token(),
            user_agent,
            proxy,
            health: SessionHealth::Fresh,
            use_count: 0,
            created_at: Utc::now(),
            last_used: None,
            client,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opaque token distinguishing this identity in logs
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }

    pub fn health(&self) -> SessionHealth {
        self.health
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    /// HTTP client carrying this identity's cookies and proxy binding
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn record_success(&mut self) {
        self.use_count += 1;
        self.last_used = Some(Instant::now());
        self.health = SessionHealth::Active;
    }

    pub(crate) fn set_health(&mut self, health: SessionHealth) {
        self.health = health;
    }
}

fn pick_user_agent(user_agents: &[String]) -> String {
    let candidates: Vec<&String> = user_agents
        .iter()
        .filter(|ua| !ua.trim().is_empty())
        .collect();

    if candidates.is_empty() {
        return format!("catalog-gleaner/{}", env!("CARGO_PKG_VERSION"));
    }
    candidates[fastrand::usize(..candidates.len())].clone()
}

fn new_identity_token() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}
