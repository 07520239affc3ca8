//! Catalog Gleaner: an adaptive product listing harvester
//!
//! This crate fetches public listing pages for product identifiers through a
//! pool of network sessions, escalates concurrency while the remote site stays
//! cooperative, and turns every page into a structured JSON record.

pub mod config;
pub mod identifier;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod session;

use thiserror::Error;

/// Main error type for Catalog Gleaner operations
#[derive(Debug, Error)]
pub enum GleanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] pipeline::FetchError),

    #[error("Output error: {0}")]
    Output(#[from] record::OutputError),

    #[error("Failed to build session {session_id}: {source}")]
    SessionBuild {
        session_id: u64,
        source: reqwest::Error,
    },

    #[error("Invalid proxy '{endpoint}': {message}")]
    Proxy { endpoint: String, message: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Identifier input errors
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read identifier file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV file {0} must have an 'asin' column")]
    MissingColumn(String),

    #[error("No valid identifiers found")]
    Empty,
}

/// Result type alias for Catalog Gleaner operations
pub type Result<T> = std::result::Result<T, GleanError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use parser::{parse_page, ParsedSections};
pub use pipeline::Harvester;
pub use record::{
    assemble_record, CombinedCsvWriter, JsonFileWriter, ProductRecord, RecordWriter, RunSummary,
};
pub use session::{SessionHealth, SessionPool};
