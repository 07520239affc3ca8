use crate::config::types::{
    ConcurrencyControlConfig, Config, DetectionConfig, FetchConfig, OutputConfig, MAX_DELAY_SECS,
};
use crate::ConfigError;
use std::time::Duration;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pool(config)?;
    validate_concurrency_control(&config.concurrent_requests_control)?;
    validate_fetch_config(&config.fetch)?;
    validate_detection_config(&config.detection)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates session pool settings
fn validate_pool(config: &Config) -> Result<(), ConfigError> {
    if config.initial_session_pool_size < 1 {
        return Err(ConfigError::Validation(format!(
            "initial_session_pool_size must be >= 1, got {}",
            config.initial_session_pool_size
        )));
    }

    if config.allow_proxy && config.proxies_file.trim().is_empty() {
        return Err(ConfigError::Validation(
            "proxies_file cannot be empty when allow_proxy is enabled".to_string(),
        ));
    }

    Ok(())
}

/// Validates the concurrency escalation settings
fn validate_concurrency_control(config: &ConcurrencyControlConfig) -> Result<(), ConfigError> {
    if config.initial_concurrent < 1 {
        return Err(ConfigError::Validation(format!(
            "initial_concurrent must be >= 1, got {}",
            config.initial_concurrent
        )));
    }

    validate_delay("scale_up_delay", config.scale_up_delay, false)?;

    if config.scale_increment < 1 {
        return Err(ConfigError::Validation(format!(
            "scale_increment must be >= 1, got {}",
            config.scale_increment
        )));
    }

    if let Some(max) = config.max_concurrent {
        if max < config.initial_concurrent {
            return Err(ConfigError::Validation(format!(
                "max_concurrent ({}) must be >= initial_concurrent ({})",
                max, config.initial_concurrent
            )));
        }
    }

    if let Some(window) = config.block_hold_window {
        validate_delay("block_hold_window", window, true)?;
    }

    Ok(())
}

/// Checks that a delay in seconds converts to a usable `Duration`
///
/// Values must be finite, at most [`MAX_DELAY_SECS`], and (unless
/// `allow_zero`) at least one nanosecond.
fn validate_delay(name: &str, secs: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let duration = Duration::try_from_secs_f64(secs).map_err(|e| {
        ConfigError::Validation(format!(
            "{} must be a non-negative number of seconds, got {} ({})",
            name, secs, e
        ))
    })?;

    if secs > MAX_DELAY_SECS {
        return Err(ConfigError::Validation(format!(
            "{} must be at most {} seconds, got {}",
            name, MAX_DELAY_SECS, secs
        )));
    }

    if duration.is_zero() && !allow_zero {
        return Err(ConfigError::Validation(format!(
            "{} must be at least one nanosecond, got {}",
            name, secs
        )));
    }

    Ok(())
}

/// Validates fetch settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            base.scheme()
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs and connect_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    if config.user_agents.iter().all(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one non-empty entry".to_string(),
        ));
    }

    Ok(())
}

/// Validates detection heuristics
fn validate_detection_config(config: &DetectionConfig) -> Result<(), ConfigError> {
    for code in config
        .blocked_status_codes
        .iter()
        .chain(config.not_found_status_codes.iter())
    {
        if !(100..=599).contains(code) {
            return Err(ConfigError::Validation(format!(
                "Invalid HTTP status code in detection rules: {}",
                code
            )));
        }
    }

    if let Some(code) = config
        .blocked_status_codes
        .iter()
        .find(|code| config.not_found_status_codes.contains(code))
    {
        return Err(ConfigError::Validation(format!(
            "Status code {} cannot be both blocked and not-found",
            code
        )));
    }

    if config
        .blocked_markers
        .iter()
        .chain(config.not_found_markers.iter())
        .any(|marker| marker.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "Detection markers cannot be empty strings".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    Ok(())
}
