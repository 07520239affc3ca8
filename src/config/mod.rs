//! Configuration module for Catalog Gleaner
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every key is optional; missing keys fall back to each section's `Default`.
//!
//! # Example
//!
//! ```no_run
//! use catalog_gleaner::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config/config.toml")).unwrap();
//! println!("Pool size: {}", config.initial_session_pool_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ConcurrencyControlConfig, Config, DetectionConfig, FetchConfig, OutputConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_or_default, load_config_with_hash, parse_config,
};
pub use validation::validate;
