//! Periodic prompting.
//!
//! The scheduler asks the request handler for the top records once at start
//! and then every `refreshIntervalMinutes`. A settings change restarts the
//! interval with the new period. Every result is published on a watch
//! channel for the HTTP layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::display;
use crate::handler::{GetStocksResponse, RequestHandler};
use crate::settings::Settings;

/// One published prompt result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// 1 for the first prompt after start.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub max_instruments: usize,
    pub response: GetStocksResponse,
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    latest: watch::Receiver<Option<Prompt>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// The most recent prompt, if any has completed.
    pub fn latest(&self) -> Option<Prompt> {
        self.latest.borrow().clone()
    }

    /// Receiver notified after every prompt.
    pub fn subscribe(&self) -> watch::Receiver<Option<Prompt>> {
        self.latest.clone()
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Refresh scheduler task did not exit cleanly");
        }
    }
}

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Start prompting on the current runtime.
    ///
    /// `clock` stamps each [`Prompt`]; pass the cache's clock so both agree.
    pub fn spawn(
        handler: RequestHandler,
        settings: watch::Receiver<Settings>,
        clock: Arc<dyn Clock>,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (latest_tx, latest_rx) = watch::channel(None);

        let task = tokio::spawn(run(handler, settings, clock, shutdown_rx, latest_tx));

        SchedulerHandle {
            shutdown: shutdown_tx,
            latest: latest_rx,
            task,
        }
    }
}

fn period(settings: &Settings) -> Duration {
    Duration::from_secs(settings.refresh_interval_minutes.max(1).saturating_mul(60))
}

fn ticker(first: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run(
    handler: RequestHandler,
    mut settings: watch::Receiver<Settings>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
    latest: watch::Sender<Option<Prompt>>,
) {
    let mut current = *settings.borrow_and_update();
    let mut ticks = interval(period(&current));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut settings_open = true;
    let mut seq = 0u64;

    info!(
        interval_minutes = current.refresh_interval_minutes,
        max_instruments = current.max_instruments,
        "Refresh scheduler started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            changed = settings.changed(), if settings_open => {
                if changed.is_err() {
                    debug!("Settings channel closed, keeping current interval");
                    settings_open = false;
                    continue;
                }
                let next = *settings.borrow_and_update();
                if period(&next) != period(&current) {
                    let every = period(&next);
                    ticks = ticker(Instant::now() + every, every);
                }
                current = next;
                info!(
                    interval_minutes = current.refresh_interval_minutes,
                    max_instruments = current.max_instruments,
                    "Refresh schedule updated"
                );
            }

            _ = ticks.tick() => {
                seq += 1;
                let response = handler.get_stocks(current.max_instruments).await;
                log_prompt(seq, &response);
                latest.send_replace(Some(Prompt {
                    seq,
                    at: clock.now(),
                    max_instruments: current.max_instruments,
                    response,
                }));
            }
        }
    }

    info!(prompts = seq, "Refresh scheduler stopped");
}

fn log_prompt(seq: u64, response: &GetStocksResponse) {
    match response {
        GetStocksResponse::Stocks { stocks } => {
            info!(seq, matched = stocks.len(), "Scheduled prompt completed");
            for (rank, record) in stocks.iter().enumerate() {
                info!(seq, rank = rank + 1, "{}", display::record_line(record));
            }
        }
        GetStocksResponse::Error { error } => {
            warn!(seq, error = %error, "Scheduled prompt failed");
        }
    }
}
