//! dipscan Library
//!
//! Screens A-share indices for a "down yesterday, opened higher today"
//! pattern from Sina's quote feed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    dipscan (Rust Service)                        │
//! │                           :4440                                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  QuoteSource ─▶ parse_batch ─▶ QuoteRecord ─▶ DipScreener         │
//! │        (sina / mock)                            │                │
//! │                                                 ▼                │
//! │  RefreshScheduler ─▶ RequestHandler ─▶ QuoteCache (TTL, shared)  │
//! │                            ▲                                     │
//! │                      HTTP routes                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Screening Rule
//!
//! A record is kept when its previous-day change is negative (hence below
//! the 9.9% limit-up ceiling) and, between 09:30 and 11:00 market time on a
//! weekday, it also opened above the previous close.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod clock;
pub mod data;
pub mod display;
pub mod handler;
pub mod routes;
pub mod scheduler;
pub mod screener;
pub mod settings;

use anyhow::{anyhow, bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use dipscan_common::config::{Config, QuotesConfig};

use crate::clock::{Clock, SystemClock};
use crate::data::{MockQuoteSource, QuoteCache, QuoteSource, SinaQuoteSource};
use crate::handler::RequestHandler;
use crate::scheduler::{Prompt, RefreshScheduler};
use crate::screener::{DipScreener, MarketCalendar};
use crate::settings::{JsonFileSettingsStore, SettingsService};

/// Shared state behind the HTTP routes
pub struct DipscanState {
    /// Configuration
    pub config: Config,
    /// Request boundary over the quote cache
    pub handler: RequestHandler,
    /// User settings
    pub settings: SettingsService,
    /// Last prompt published by the scheduler
    pub latest: watch::Receiver<Option<Prompt>>,
}

/// Pick the quote source named in the configuration.
pub fn build_source(config: &QuotesConfig) -> Result<Arc<dyn QuoteSource>> {
    match config.source.as_str() {
        "sina" => Ok(Arc::new(SinaQuoteSource::from_config(config))),
        "mock" => Ok(Arc::new(MockQuoteSource::new())),
        other => bail!("Unknown quote source: {}", other),
    }
}

/// Build the quote cache from configuration.
pub fn build_cache(
    config: &QuotesConfig,
    source: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
) -> Result<QuoteCache> {
    let calendar = MarketCalendar::with_utc_offset_hours(config.market_utc_offset_hours)
        .ok_or_else(|| anyhow!("Invalid market UTC offset: {}", config.market_utc_offset_hours))?;
    let ttl = i64::try_from(config.cache_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| anyhow!("Cache TTL out of range: {}s", config.cache_ttl_secs))?;

    Ok(QuoteCache::new(
        source,
        config.codes.clone(),
        ttl,
        DipScreener::new(calendar),
        clock,
    ))
}

/// Main screener service
pub struct DipscanService {
    config: Config,
    clock: Arc<dyn Clock>,
    handler: RequestHandler,
    settings: SettingsService,
}

impl DipscanService {
    /// Wire the quote pipeline and load (or install) settings.
    pub fn new(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let source = build_source(&config.quotes)?;
        let cache = build_cache(&config.quotes, source, clock.clone())?;

        let settings_path = config.settings_path();
        let store = Arc::new(JsonFileSettingsStore::new(&settings_path));
        let settings = SettingsService::install(store)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

        tracing::info!(
            source = %config.quotes.source,
            codes = ?config.quotes.codes,
            ttl_secs = config.quotes.cache_ttl_secs,
            settings = %settings_path.display(),
            "Quote pipeline ready"
        );

        Ok(Self {
            config,
            clock,
            handler: RequestHandler::new(cache),
            settings,
        })
    }

    /// Start the scheduler and the HTTP server; return after Ctrl-C.
    pub async fn start(self) -> Result<()> {
        let scheduler = RefreshScheduler::spawn(
            self.handler.clone(),
            self.settings.subscribe(),
            self.clock.clone(),
        );

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .context("Invalid server bind address")?;

        let state = Arc::new(DipscanState {
            config: self.config,
            handler: self.handler,
            settings: self.settings,
            latest: scheduler.subscribe(),
        });
        let app = routes::build_router(state);

        tracing::info!(address = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        tracing::info!("Stopping refresh scheduler");
        if tokio::time::timeout(Duration::from_secs(15), scheduler.stop())
            .await
            .is_err()
        {
            tracing::warn!("Refresh scheduler did not stop in time");
        }

        served.context("HTTP server failed")
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
