//! Response classification
//!
//! Maps a status code and body onto the outcome the fetch state machine acts
//! on. The status codes and body markers come from `[detection]`.

use crate::config::DetectionConfig;

/// Classified outcome of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    /// A listing page worth parsing
    Success,

    /// The site challenged or refused this identity
    Blocked(String),

    /// Network trouble, a server error, or any other unexpected status
    Transient(String),

    /// The site answered that no such listing exists
    NotFound,
}

/// Classifies a completed response
///
/// # Arguments
///
/// * `status` - HTTP status code
/// * `body` - Response body as text
/// * `rules` - Detection heuristics
///
/// # Returns
///
/// Status rules win over body markers. A 2xx page carrying a blocked marker is
/// [`ResponseClass::Blocked`]; one carrying a not-found marker is
/// [`ResponseClass::NotFound`].
pub fn classify_response(status: u16, body: &str, rules: &DetectionConfig) -> ResponseClass {
    if rules.blocked_status_codes.contains(&status) {
        return ResponseClass::Blocked(format!("HTTP {}", status));
    }

    if rules.not_found_status_codes.contains(&status) {
        return ResponseClass::NotFound;
    }

    if !(200..300).contains(&status) {
        return ResponseClass::Transient(format!("unexpected HTTP {}", status));
    }

    let lowered = body.to_lowercase();

    if let Some(marker) = find_marker(&lowered, &rules.blocked_markers) {
        return ResponseClass::Blocked(format!("challenge marker '{}'", marker));
    }

    if find_marker(&lowered, &rules.not_found_markers).is_some() {
        return ResponseClass::NotFound;
    }

    ResponseClass::Success
}

/// Classifies a transport failure (no response received)
pub fn classify_transport_error(error: &reqwest::Error) -> ResponseClass {
    let reason = if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else if error.is_body() || error.is_decode() {
        format!("failed to read body: {}", error)
    } else {
        error.to_string()
    };

    ResponseClass::Transient(reason)
}

fn find_marker<'a>(lowered_body: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .find(|marker| lowered_body.contains(&marker.to_lowercase()))
        .map(String::as_str)
}
