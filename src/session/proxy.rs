//! Proxy endpoint list
//!
//! Proxies are listed one per line as `ip:port` or `ip:port:username:password`.

use crate::GleanError;
use std::fmt;
use std::path::Path;

/// One proxy endpoint a session can be bound to
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parses a proxy list line
    pub fn parse(line: &str) -> Result<Self, GleanError> {
        let invalid = |message: &str| GleanError::Proxy {
            endpoint: redact(line),
            message: message.to_string(),
        };

        let parts: Vec<&str> = line.trim().split(':').collect();
        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => (*host, *port, Some(*user), Some(*pass)),
            _ => return Err(invalid("expected ip:port or ip:port:username:password")),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number between 0 and 65535"))?;

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    /// Proxy URL including credentials, as handed to the HTTP client
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("http://{}:{}@{}:{}", user, pass, self.host, self.port)
            }
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

// Credentials never reach logs.
impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyEndpoint({}:{})", self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn redact(line: &str) -> String {
    line.trim().splitn(3, ':').take(2).collect::<Vec<_>>().join(":")
}

/// Loads proxies from a list file
///
/// A missing or empty file is not an error: the pool runs without proxies and
/// a warning is logged. Malformed lines are skipped with a warning.
pub fn load_proxies(path: &Path) -> Vec<ProxyEndpoint> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(
                "Proxy list {} unavailable ({}), running without proxy",
                path.display(),
                e
            );
            return Vec::new();
        }
    };

    let proxies = parse_proxy_list(&content);
    if proxies.is_empty() {
        tracing::warn!(
            "Proxy list {} is empty, running without proxy",
            path.display()
        );
    } else {
        tracing::info!("Loaded {} proxies from {}", proxies.len(), path.display());
    }
    proxies
}

/// Parses proxy list content, skipping blank and malformed lines
pub fn parse_proxy_list(content: &str) -> Vec<ProxyEndpoint> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match ProxyEndpoint::parse(line) {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                tracing::warn!("Skipping proxy entry: {}", e);
                None
            }
        })
        .collect()
}

/// Picks a random proxy from the list
pub fn pick_proxy(proxies: &[ProxyEndpoint]) -> Option<ProxyEndpoint> {
    if proxies.is_empty() {
        return None;
    }
    Some(proxies[fastrand::usize(..proxies.len())].clone())
}
