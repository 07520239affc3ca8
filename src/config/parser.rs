use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use catalog_gleaner::config::load_config;
///
/// let config = load_config(Path::new("config/config.toml")).unwrap();
/// println!("Initial permits: {}", config.concurrent_requests_control.initial_concurrent);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Loads a configuration file, falling back to defaults when it does not exist
///
/// Only a missing file falls back. A file that exists but cannot be read,
/// parsed or validated is still an error.
pub fn load_config_or_default(path: &Path) -> Result<(Config, Option<String>), ConfigError> {
    if !path.exists() {
        tracing::warn!(
            "Config file {} not found, using default configuration",
            path.display()
        );
        let config = Config::default();
        validate(&config)?;
        return Ok((config, None));
    }

    let (config, hash) = load_config_with_hash(path)?;
    Ok((config, Some(hash)))
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This ties the records of a run to the configuration that produced them.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
initial_session_pool_size = 8
allow_proxy = false

[concurrent_requests_control]
initial_concurrent = 4
scale_up_delay = 1.5
scale_increment = 3

[fetch]
base_url = "https://catalog.example.com"
max_attempts = 5

[output]
directory = "./records"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.initial_session_pool_size, 8);
        assert_eq!(config.concurrent_requests_control.initial_concurrent, 4);
        assert_eq!(config.concurrent_requests_control.scale_up_delay, 1.5);
        assert_eq!(config.concurrent_requests_control.scale_increment, 3);
        assert_eq!(config.fetch.base_url, "https://catalog.example.com");
        assert_eq!(config.fetch.max_attempts, 5);
        assert_eq!(config.output.directory, "./records");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.initial_session_pool_size, 5);
        assert!(!config.allow_proxy);
        assert_eq!(config.concurrent_requests_control.initial_concurrent, 3);
        assert_eq!(config.concurrent_requests_control.scale_up_delay, 0.0005);
        assert_eq!(config.concurrent_requests_control.scale_increment, 2);
        assert!(config.detection.blocked_status_codes.contains(&503));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let (config, hash) =
            load_config_or_default(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.initial_session_pool_size, 5);
        assert!(hash.is_none());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
initial_session_pool_size = 0
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_unrepresentable_delays_rejected() {
        let result = parse_config("[concurrent_requests_control]\nscale_up_delay = 1e30\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = parse_config("[concurrent_requests_control]\nscale_up_delay = 1e-12\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = parse_config("[concurrent_requests_control]\nblock_hold_window = 1e30\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_file_does_not_fall_back() {
        let file = create_temp_config("allow_proxy = \"sometimes\"");
        let result = load_config_or_default(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
