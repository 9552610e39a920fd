//! Screened quote cache.
//!
//! Holds the most recent screened batch with a TTL and runs the
//! fetch → parse → derive → screen pipeline when the batch is stale.
//!
//! # States
//!
//! - **Fresh**: a non-empty batch younger than the TTL. Served as is.
//! - **Stale**: no batch, an empty batch, or one at least TTL old. The next
//!   `get` refreshes.
//!
//! At most one refresh runs at a time; callers arriving while it is in
//! flight await the same shared future and observe the same outcome. The
//! refresh runs on its own task, so it finishes and updates the cache even if
//! every caller stops waiting. A failed refresh leaves the previous batch in
//! place.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::screener::DipScreener;

use super::provider::QuoteSource;
use super::sina::parse_batch;
use super::{QuoteError, QuoteRecord};

type RefreshResult = Result<Arc<CacheEntry>, QuoteError>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

/// One screened batch and when it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    records: Vec<QuoteRecord>,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn records(&self) -> &[QuoteRecord] {
        &self.records
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// The first `max` records, in batch order.
    pub fn head(&self, max: usize) -> Vec<QuoteRecord> {
        self.records.iter().take(max).cloned().collect()
    }
}

/// Cache statistics for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub source: String,
    pub cached_records: usize,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub ttl_secs: i64,
    pub fresh: bool,
    pub refreshing: bool,
}

#[derive(Default)]
struct CacheState {
    entry: Option<Arc<CacheEntry>>,
    inflight: Option<RefreshFuture>,
}

struct Inner {
    source: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
    screener: DipScreener,
    codes: Vec<String>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        !entry.records.is_empty() && self.clock.now() - entry.fetched_at < self.ttl
    }

    /// Join the in-flight refresh, or start one.
    fn refresh_future(self: &Arc<Self>, state: &mut CacheState) -> RefreshFuture {
        if let Some(inflight) = &state.inflight {
            debug!("Joining in-flight quote refresh");
            return inflight.clone();
        }

        // The pipeline runs on its own task so it completes and clears
        // `inflight` even when every waiter has been dropped.
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.run_pipeline().await.map(Arc::new);

            let mut state = inner.lock();
            state.inflight = None;
            match &result {
                Ok(entry) => state.entry = Some(Arc::clone(entry)),
                Err(e) => warn!(
                    source = inner.source.name(),
                    error = %e,
                    kept_previous = state.entry.is_some(),
                    "Quote refresh failed"
                ),
            }
            result
        });

        let cleanup = Arc::clone(self);
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    cleanup.lock().inflight = None;
                    Err(QuoteError::Unavailable(format!(
                        "quote refresh task failed: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared();

        state.inflight = Some(future.clone());
        future
    }

    async fn run_pipeline(&self) -> Result<CacheEntry, QuoteError> {
        let fetched_at = self.clock.now();
        let started = std::time::Instant::now();

        let text = self.source.fetch_raw(&self.codes).await?;
        let raw = parse_batch(&text)?;
        if raw.len() != self.codes.len() {
            warn!(
                requested = self.codes.len(),
                received = raw.len(),
                "Quote batch size differs from requested codes"
            );
        }

        let records: Vec<QuoteRecord> = raw.into_iter().map(QuoteRecord::from_raw).collect();
        let fetched = records.len();
        let records = self.screener.filter(records, self.clock.now());

        info!(
            source = self.source.name(),
            fetched,
            matched = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Quote cache refreshed"
        );

        Ok(CacheEntry {
            records,
            fetched_at,
        })
    }
}

/// TTL cache in front of the quote pipeline. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QuoteCache {
    inner: Arc<Inner>,
}

impl QuoteCache {
    /// Create an empty cache.
    ///
    /// # Arguments
    /// * `source` - Where raw quote text comes from
    /// * `codes` - Instrument codes requested on every refresh, in order
    /// * `ttl` - How long a non-empty batch stays fresh
    /// * `screener` - Predicate applied to every fresh batch
    /// * `clock` - Time source for freshness and the opening window
    pub fn new(
        source: Arc<dyn QuoteSource>,
        codes: Vec<String>,
        ttl: Duration,
        screener: DipScreener,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                screener,
                codes,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Return up to `max` screened records, refreshing first if stale.
    ///
    /// On refresh failure the error is returned and the previous batch is kept.
    pub async fn get(&self, max: usize) -> Result<Vec<QuoteRecord>, QuoteError> {
        let refresh = {
            let mut state = self.inner.lock();
            if let Some(entry) = state.entry.as_ref().filter(|e| self.inner.is_fresh(e)) {
                debug!(cached = entry.records.len(), max, "Serving fresh quote cache");
                return Ok(entry.head(max));
            }
            self.inner.refresh_future(&mut state)
        };

        Ok(refresh.await?.head(max))
    }

    /// Refetch regardless of freshness, then return up to `max` records.
    ///
    /// Joins a refresh that is already in flight instead of starting another.
    pub async fn refresh(&self, max: usize) -> Result<Vec<QuoteRecord>, QuoteError> {
        let refresh = {
            let mut state = self.inner.lock();
            self.inner.refresh_future(&mut state)
        };

        Ok(refresh.await?.head(max))
    }

    /// The current batch, without triggering a fetch.
    pub fn snapshot(&self) -> Option<Arc<CacheEntry>> {
        self.inner.lock().entry.clone()
    }

    /// Freshness and size of the current batch.
    pub fn status(&self) -> CacheStatus {
        let state = self.inner.lock();
        let now = self.inner.clock.now();
        let entry = state.entry.as_ref();

        CacheStatus {
            source: self.inner.source.name().to_string(),
            cached_records: entry.map_or(0, |e| e.records.len()),
            fetched_at: entry.map(|e| e.fetched_at),
            age_secs: entry.map(|e| (now - e.fetched_at).num_seconds()),
            ttl_secs: self.inner.ttl.num_seconds(),
            fresh: entry.is_some_and(|e| self.inner.is_fresh(e)),
            refreshing: state.inflight.is_some(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Source that replays queued responses and counts calls.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<String, QuoteError>>>,
        calls: AtomicU32,
        delay: Option<std::time::Duration>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<String, QuoteError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_raw(&self, _codes: &[String]) -> Result<String, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(QuoteError::Unavailable("script exhausted".into())))
        }
    }

    /// `n` lines that all pass the screener (open above previous close).
    fn passing_batch(n: usize) -> String {
        (0..n)
            .map(|i| {
                let mut fields = vec!["0"; 32];
                fields[0] = "X";
                fields[1] = "100.00";
                fields[2] = "99.00";
                fields[3] = "98.50";
                fields[4] = "101.00";
                fields[5] = "97.00";
                fields[16] = "1000";
                format!("var hq_str_sh{:06}=\"{}\";", i, fields.join(","))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn start() -> chrono::DateTime<Utc> {
        // Wednesday 14:00 Beijing, outside the opening window.
        Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap()
    }

    fn cache_with(source: Arc<ScriptedSource>, clock: Arc<ManualClock>) -> QuoteCache {
        QuoteCache::new(
            source,
            vec!["sh000001".into()],
            Duration::minutes(5),
            DipScreener::default(),
            clock,
        )
    }

    #[tokio::test]
    async fn test_fresh_cache_is_not_refetched() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(passing_batch(3))]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock.clone());

        let first = cache.get(10).await.unwrap();
        clock.advance(Duration::minutes(4));
        let second = cache.get(10).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert!(cache.status().fresh);
    }

    #[tokio::test]
    async fn test_expired_cache_is_refetched() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(passing_batch(3)),
            Ok(passing_batch(1)),
        ]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock.clone());

        assert_eq!(cache.get(10).await.unwrap().len(), 3);
        clock.advance(Duration::minutes(5));
        assert_eq!(cache.get(10).await.unwrap().len(), 1);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.snapshot().unwrap().fetched_at(), start() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_entry() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(passing_batch(2)),
            Err(QuoteError::Network("connection reset".into())),
        ]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock.clone());

        cache.get(10).await.unwrap();
        let before = cache.snapshot().unwrap();

        clock.advance(Duration::minutes(6));
        let err = cache.get(10).await.unwrap_err();
        assert_eq!(err, QuoteError::Network("connection reset".into()));

        let after = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!cache.status().refreshing);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_entry() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(passing_batch(2)),
            Ok("sh000001=\"no prefix\"".into()),
        ]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock.clone());

        cache.get(10).await.unwrap();
        clock.advance(Duration::minutes(6));
        assert!(matches!(cache.get(10).await, Err(QuoteError::Parse { .. })));
        assert_eq!(cache.snapshot().unwrap().records().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_always_stale() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(String::new()), Ok(String::new())]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock);

        assert!(cache.get(10).await.unwrap().is_empty());
        assert!(cache.get(10).await.unwrap().is_empty());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_truncates_to_max() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(passing_batch(10))]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock);

        let all = cache.get(100).await.unwrap();
        let head = cache.get(3).await.unwrap();
        assert_eq!(head.as_slice(), &all[..3]);
        assert!(cache.get(0).await.unwrap().is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_forced_refresh_ignores_freshness() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(passing_batch(2)),
            Ok(passing_batch(4)),
        ]));
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock);

        cache.get(10).await.unwrap();
        assert_eq!(cache.refresh(10).await.unwrap().len(), 4);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_fetch() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(passing_batch(3))])
                .with_delay(std::time::Duration::from_millis(200)),
        );
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock);

        let (a, b, c) = tokio::join!(cache.get(10), cache.get(2), cache.refresh(1));
        assert_eq!(a.unwrap().len(), 3);
        assert_eq!(b.unwrap().len(), 2);
        assert_eq!(c.unwrap().len(), 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failure() {
        let source = Arc::new(
            ScriptedSource::new(vec![Err(QuoteError::Timeout { secs: 10 })])
                .with_delay(std::time::Duration::from_millis(200)),
        );
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock);

        let (a, b) = tokio::join!(cache.get(10), cache.get(10));
        assert_eq!(a.unwrap_err(), QuoteError::Timeout { secs: 10 });
        assert_eq!(b.unwrap_err(), QuoteError::Timeout { secs: 10 });
        assert_eq!(source.calls(), 1);
        assert!(cache.snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_still_completes() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(passing_batch(2)), Ok(passing_batch(3))])
                .with_delay(std::time::Duration::from_secs(5)),
        );
        let clock = Arc::new(ManualClock::new(start()));
        let cache = cache_with(source.clone(), clock.clone());

        // The only waiter gives up before the fetch returns.
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_secs(1), cache.get(10)).await;
        assert!(abandoned.is_err());
        assert!(cache.status().refreshing);

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert!(!cache.status().refreshing);
        let entry = cache.snapshot().unwrap();
        assert_eq!(entry.records().len(), 2);
        assert_eq!(entry.fetched_at(), start());
        assert_eq!(source.calls(), 1);

        clock.advance(Duration::hours(1));
        assert_eq!(cache.get(10).await.unwrap().len(), 3);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.snapshot().unwrap().fetched_at(), start() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_status_before_first_fetch() {
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let clock = Arc::new(ManualClock::new(start()));
        let status = cache_with(source, clock).status();

        assert_eq!(status.source, "scripted");
        assert_eq!(status.cached_records, 0);
        assert!(status.fetched_at.is_none());
        assert!(!status.fresh);
        assert_eq!(status.ttl_secs, 300);
    }
}
