//! dipscan - A-share dip screener service.
//!
//! Polls Sina quotes for a configured list of indices, keeps those that fell
//! in the previous session and opened higher, and serves them over HTTP.

use anyhow::{Context, Result};
use dipscan::DipscanService;
use dipscan_common::config::{config_path, Config};
use dipscan_common::logging::init_logging;
use dipscan_common::Validate;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load_with_env()?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("dipscan v{}", env!("CARGO_PKG_VERSION"));
    let path = config_path();
    if path.exists() {
        tracing::info!(path = %path.display(), "Loaded config file");
    } else {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
    }

    let service = DipscanService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
