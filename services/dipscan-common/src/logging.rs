//! Logging utilities for dipscan services.
//!
//! Structured logging on top of `tracing-subscriber`, either human-readable
//! ("pretty") or JSON.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tokio_util)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level. `RUST_LOG` overrides everything.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
];

/// Build the filter directive string for a base level plus exclusions.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Build the EnvFilter, letting `RUST_LOG` win when it is set.
fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_directives(log_level, excluded_targets)))
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
/// * `excluded_targets` - Extra module targets forced to `warn`, on top of [`NOISY_MODULES`]
pub fn init_logging(log_level: &str, log_format: &str, excluded_targets: &[String]) {
    let filter = build_filter(log_level, excluded_targets);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new request ID for tracing a single boundary request.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}
