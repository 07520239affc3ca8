//! Catalog Gleaner main entry point
//!
//! This is the command-line interface for the Catalog Gleaner listing harvester.

use catalog_gleaner::config::{load_config_or_default, Config};
use catalog_gleaner::identifier::{collect_valid, dedupe_identifiers, load_identifiers};
use catalog_gleaner::record::print_summary;
use catalog_gleaner::{CombinedCsvWriter, Harvester, InputError, JsonFileWriter, RecordWriter};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Catalog Gleaner: an adaptive product listing harvester
///
/// Catalog Gleaner fetches listing pages for product identifiers through a
/// pool of sessions, raises concurrency while the site stays cooperative,
/// and writes one JSON record per identifier.
#[derive(Parser, Debug)]
#[command(name = "catalog-gleaner")]
#[command(version = "1.0.0")]
#[command(about = "An adaptive product listing harvester", long_about = None)]
struct Cli {
    /// Product identifiers to harvest
    #[arg(value_name = "IDENTIFIER")]
    identifiers: Vec<String>,

    /// Read identifiers from a file (.csv with an `asin` column, or one per line)
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Override the output directory from the configuration
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and list the identifiers without fetching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_or_default(&cli.config) {
        Ok((config, Some(hash))) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Ok((config, None)) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(output) = &cli.output {
        config.output.directory = output.display().to_string();
    }

    let identifiers = gather_identifiers(&cli)?;

    if cli.dry_run {
        handle_dry_run(&config, &identifiers);
        return Ok(());
    }

    handle_harvest(config, identifiers).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_gleaner=info,warn"),
            1 => EnvFilter::new("catalog_gleaner=debug,info"),
            2 => EnvFilter::new("catalog_gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Collects identifiers from the command line and the input file
///
/// Command-line identifiers come first. Duplicates are removed keeping the
/// first occurrence.
fn gather_identifiers(cli: &Cli) -> Result<Vec<String>, InputError> {
    let mut identifiers = collect_valid(&cli.identifiers);

    if let Some(path) = &cli.file {
        identifiers.extend(load_identifiers(path)?);
    }

    let unique = dedupe_identifiers(identifiers);
    if unique.is_empty() {
        return Err(InputError::Empty);
    }

    tracing::info!("{} unique identifiers to process", unique.len());
    Ok(unique)
}

/// Handles the --dry-run mode: shows the configuration and the identifiers
fn handle_dry_run(config: &Config, identifiers: &[String]) {
    println!("=== Catalog Gleaner Dry Run ===\n");

    println!("Fetch:");
    println!("  Base URL: {}", config.fetch.base_url);
    println!("  Max attempts: {}", config.fetch.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms max",
        config.fetch.backoff_base_ms, config.fetch.backoff_max_ms
    );
    println!("  Warm-up: {}", config.fetch.warm_up);
    println!("  Offers: {}", config.fetch.fetch_offers);

    let control = &config.concurrent_requests_control;
    println!("\nConcurrency:");
    println!("  Initial: {}", control.initial_concurrent);
    println!(
        "  Increment: {} every {}s",
        control.scale_increment, control.scale_up_delay
    );
    match control.max_concurrent {
        Some(max) => println!("  Maximum: {}", max),
        None => println!("  Maximum: unbounded"),
    }

    println!("\nSessions:");
    println!("  Pool size: {}", config.initial_session_pool_size);
    if config.allow_proxy {
        println!("  Proxies: {}", config.proxies_file);
    } else {
        println!("  Proxies: disabled");
    }

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!(
        "  Combined CSV: {}",
        if config.output.combined_csv { "yes" } else { "no" }
    );

    println!("\nIdentifiers ({}):", identifiers.len());
    for identifier in identifiers {
        println!("  - {}", identifier);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main harvest mode
async fn handle_harvest(
    config: Config,
    identifiers: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = JsonFileWriter::new(&config.output.directory)?;
    let directory = writer.directory().to_path_buf();
    tracing::info!("Writing records to {}", directory.display());

    let csv = config
        .output
        .combined_csv
        .then(|| Arc::new(CombinedCsvWriter::new(writer.clone())));
    let records: Arc<dyn RecordWriter> = match &csv {
        Some(csv) => csv.clone(),
        None => Arc::new(writer),
    };

    let harvester = Harvester::new(config, records)?;

    // Ctrl-C stops admission and starts the grace period
    let cancel = harvester.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, stopping harvest");
                cancel.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let summary = harvester.run(identifiers).await;

    if let Some(csv) = csv {
        match csv.export(&directory, Utc::now()) {
            Ok(Some(path)) => println!("Combined CSV: {}", path.display()),
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to write combined CSV: {}", e),
        }
    }

    println!();
    print_summary(&summary);

    Ok(())
}
