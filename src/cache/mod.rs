/// TTL cache with single-flight refresh in front of the flight scrape
use crate::config::CacheConfig;
use crate::domain::{CacheEntry, CacheSource, CacheStats, Diagnostics, ScrapeResult};
use crate::errors::{ScrapeError, ScrapeResultOf};
use crate::services::FlightSource;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

pub const STALE_WARNING: &str = "stale";

/// Time source, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type Outcome = Result<Arc<CacheEntry>, Arc<ScrapeError>>;
type InFlight = Shared<BoxFuture<'static, Outcome>>;

/// A published snapshot plus how this call obtained it
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entry: Arc<CacheEntry>,
    pub diagnostics: Diagnostics,
}

impl Snapshot {
    fn new(entry: Arc<CacheEntry>, source: CacheSource, now: DateTime<Utc>) -> Self {
        let diagnostics = Diagnostics {
            source,
            age_seconds: age_seconds(&entry, now),
            scrape_count: entry.scrape_count,
            warning: None,
            error: None,
        };
        Self { entry, diagnostics }
    }

    fn stale(entry: Arc<CacheEntry>, now: DateTime<Utc>, err: &ScrapeError) -> Self {
        let mut snapshot = Self::new(entry, CacheSource::Stale, now);
        snapshot.diagnostics.warning = Some(STALE_WARNING.to_string());
        snapshot.diagnostics.error = Some(err.to_string());
        snapshot
    }
}

#[derive(Default)]
struct CacheState {
    entry: Option<Arc<CacheEntry>>,
    /// Running scrape and the generation it was started in
    in_flight: Option<(u64, InFlight)>,
    /// Bumped by `clear`; scrapes from an older generation do not publish
    generation: u64,
    scrape_count: u64,
    hits: u64,
    misses: u64,
    coalesced: u64,
    last_error: Option<String>,
}

struct Inner {
    source: Arc<dyn FlightSource>,
    clock: Arc<dyn Clock>,
    ttl_seconds: u64,
    state: Mutex<CacheState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        (now - entry.fetched_at).num_milliseconds() < ttl_ms
    }

    /// Record a finished scrape; the lock is held only for the swap
    fn publish(&self, generation: u64, result: ScrapeResultOf<ScrapeResult>) -> Outcome {
        let mut state = self.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|(started_in, _)| *started_in == generation)
        {
            state.in_flight = None;
        }

        match result {
            Ok(result) => {
                state.scrape_count += 1;
                let entry = Arc::new(CacheEntry {
                    result,
                    fetched_at: self.clock.now(),
                    scrape_count: state.scrape_count,
                });
                if generation == state.generation {
                    state.entry = Some(entry.clone());
                    state.last_error = None;
                    info!(
                        "Scrape #{} published - {} flights",
                        entry.scrape_count,
                        entry.result.total_flights()
                    );
                } else {
                    info!("Scrape #{} finished after a clear - not published", entry.scrape_count);
                }
                Ok(entry)
            }
            Err(e) => {
                error!("Scrape failed: {}", e);
                if generation == state.generation {
                    state.last_error = Some(e.to_string());
                }
                Err(Arc::new(e))
            }
        }
    }

    /// Forget a scrape task that died without publishing
    fn abandon(&self, generation: u64, reason: &str) -> Outcome {
        let mut state = self.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|(started_in, _)| *started_in == generation)
        {
            state.in_flight = None;
        }
        let err = ScrapeError::Aborted(reason.to_string());
        error!("{}", err);
        if generation == state.generation {
            state.last_error = Some(err.to_string());
        }
        Err(Arc::new(err))
    }
}

fn age_seconds(entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
    (now - entry.fetched_at).num_milliseconds() as f64 / 1000.0
}

/// Bounds how often the scrape runs and shares each run between concurrent callers.
///
/// The first caller that finds no fresh entry starts the scrape on its own
/// task; everyone arriving meanwhile awaits that same run. A failed run
/// falls back to the previous snapshot when there is one.
#[derive(Clone)]
pub struct RefreshCoalescingCache {
    inner: Arc<Inner>,
}

impl RefreshCoalescingCache {
    pub fn new(source: Arc<dyn FlightSource>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                ttl_seconds: config.ttl_seconds,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Fresh snapshot from memory, or the result of a (shared) scrape
    pub async fn get_or_refresh(&self) -> Result<Snapshot, Arc<ScrapeError>> {
        let (flight, source) = {
            let mut state = self.inner.lock();
            let now = self.inner.clock.now();
            if let Some(entry) = state.entry.clone() {
                if self.inner.is_fresh(&entry, now) {
                    state.hits += 1;
                    let snapshot = Snapshot::new(entry, CacheSource::Hit, now);
                    info!("Cache hit - age {:.1}s", snapshot.diagnostics.age_seconds);
                    return Ok(snapshot);
                }
            }
            self.join_or_start(&mut state)
        };
        self.settle(flight, source).await
    }

    /// Scrape regardless of TTL, joining a run already in progress
    pub async fn force_refresh(&self) -> Result<Snapshot, Arc<ScrapeError>> {
        let (flight, source) = {
            let mut state = self.inner.lock();
            self.join_or_start(&mut state)
        };
        self.settle(flight, source).await
    }

    /// Drop the published entry; the next call always scrapes
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entry = None;
        state.generation += 1;
        if state.in_flight.take().is_some() {
            info!("Cache cleared - detached running scrape");
        } else {
            info!("Cache cleared");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let now = self.inner.clock.now();
        let total = state.hits + state.misses + state.coalesced;
        let hit_rate = if total > 0 {
            (state.hits as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        let fresh = state
            .entry
            .as_ref()
            .is_some_and(|entry| self.inner.is_fresh(entry, now));

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            coalesced: state.coalesced,
            hit_rate,
            scrape_count: state.scrape_count,
            cache_age: state.entry.as_ref().map(|entry| age_seconds(entry, now)),
            ttl: self.inner.ttl_seconds,
            is_expired: !fresh,
            has_data: state.entry.is_some(),
            last_error: state.last_error.clone(),
            refresh_in_progress: state.in_flight.is_some(),
        }
    }

    fn join_or_start(&self, state: &mut CacheState) -> (InFlight, CacheSource) {
        if let Some(flight) = state.in_flight.as_ref().map(|(_, f)| f.clone()) {
            state.coalesced += 1;
            info!("Refresh already running - joining it");
            return (flight, CacheSource::Coalesced);
        }

        state.misses += 1;
        let generation = state.generation;
        let flight = self.spawn_refresh(generation);
        state.in_flight = Some((generation, flight.clone()));
        (flight, CacheSource::Refreshed)
    }

    /// Run the scrape on its own task so a dropped caller cannot cancel it
    fn spawn_refresh(&self, generation: u64) -> InFlight {
        info!("Cache miss - scraping");
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.source.scrape_all().await;
            inner.publish(generation, result)
        });

        let inner = self.inner.clone();
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => inner.abandon(generation, &e.to_string()),
            }
        }
        .boxed()
        .shared()
    }

    async fn settle(&self, flight: InFlight, source: CacheSource) -> Result<Snapshot, Arc<ScrapeError>> {
        match flight.await {
            Ok(entry) => Ok(Snapshot::new(entry, source, self.inner.clock.now())),
            Err(err) => {
                let prior = self.inner.lock().entry.clone();
                match prior {
                    Some(prior) => {
                        let snapshot = Snapshot::stale(prior, self.inner.clock.now(), &err);
                        warn!(
                            "Serving stale snapshot (age {:.1}s)",
                            snapshot.diagnostics.age_seconds
                        );
                        Ok(snapshot)
                    }
                    None => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use crate::domain::{Direction, FlightRecord, ScrapeResult};
    use crate::errors::{ScrapeError, ScrapeResultOf};
    use crate::services::FlightSource;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    pub struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Utc.with_ymd_and_hms(2024, 12, 8, 19, 30, 0).unwrap()),
            }
        }

        pub fn advance(&self, seconds: i64) {
            *self.now.lock().unwrap() += Duration::seconds(seconds);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    pub fn sample_result(numbers: &[&str]) -> ScrapeResult {
        let arrivals = numbers
            .iter()
            .map(|n| {
                let mut record = FlightRecord::new(Direction::Arrival);
                record.airline = "AR".to_string();
                record.number = n.to_string();
                record.position = "05".to_string();
                record
            })
            .collect();
        ScrapeResult {
            arrivals,
            departures: Vec::new(),
            elapsed: std::time::Duration::from_millis(1500),
            phases: Vec::new(),
        }
    }

    pub fn outage() -> ScrapeError {
        ScrapeError::Network {
            attempts: 3,
            message: "connection refused".to_string(),
        }
        .in_phase(crate::domain::Phase::Departures)
    }

    /// Hands out queued outcomes, then successes; optionally waits for a permit per call
    #[derive(Default)]
    pub struct FakeSource {
        outcomes: Mutex<VecDeque<ScrapeResultOf<ScrapeResult>>>,
        calls: AtomicUsize,
        gated: bool,
        pub gate: Notify,
    }

    impl FakeSource {
        pub fn new(outcomes: Vec<ScrapeResultOf<ScrapeResult>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }

        pub fn gated() -> Self {
            Self::gated_with(vec![])
        }

        pub fn gated_with(outcomes: Vec<ScrapeResultOf<ScrapeResult>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                gated: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FlightSource for FakeSource {
        fn scrape_all(&self) -> BoxFuture<'_, ScrapeResultOf<ScrapeResult>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.gated {
                    self.gate.notified().await;
                }
                self.outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(sample_result(&["1303", "1450"])))
            }
            .boxed()
        }
    }
}
