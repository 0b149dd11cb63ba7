/// Scrape orchestration: pagination with duplicate detection, and the four-phase aggregation
use crate::clients::{HttpClient, PageTransport};
use crate::config::ScraperConfig;
use crate::domain::{Direction, FlightRecord, PageResult, Phase, PhaseReport, ScrapeResult, TimeWindow};
use crate::errors::ScrapeResultOf;
use crate::navigator::{Filters, FormNavigator};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};

/// Anything able to produce a complete scrape; the cache sits in front of one
pub trait FlightSource: Send + Sync {
    fn scrape_all(&self) -> BoxFuture<'_, ScrapeResultOf<ScrapeResult>>;
}

/// Remembers every key seen during one pagination walk
#[derive(Debug, Default)]
pub struct DedupGuard {
    seen: HashSet<String>,
}

impl DedupGuard {
    pub fn record(&mut self, records: &[FlightRecord]) {
        self.seen
            .extend(records.iter().map(FlightRecord::dedup_key));
    }

    /// Key of the page's first record, if that record was already seen
    pub fn repeated_first(&self, records: &[FlightRecord]) -> Option<String> {
        let key = records.first()?.dedup_key();
        self.seen.contains(&key).then_some(key)
    }
}

/// Records gathered by one pagination walk
#[derive(Debug, Default)]
pub struct PageWalk {
    pub records: Vec<FlightRecord>,
    pub pages: usize,
    pub halted_on_duplicate: Option<String>,
}

/// Follow the first page's pager targets, at most `max_pages` pages in total.
///
/// Stops early, without error, when a page opens with a flight already seen.
pub async fn collect_pages<T: PageTransport>(
    nav: &mut FormNavigator<T>,
    first: PageResult,
    max_pages: usize,
) -> ScrapeResultOf<PageWalk> {
    let PageResult {
        records,
        pager_targets,
    } = first;

    let mut guard = DedupGuard::default();
    guard.record(&records);
    log_page(1, &records);

    let mut walk = PageWalk {
        records,
        pages: 1,
        halted_on_duplicate: None,
    };

    if pager_targets.is_empty() {
        info!("Single page available");
        return Ok(walk);
    }
    info!("{} page(s) advertised", pager_targets.len() + 1);

    for target in pager_targets.iter().take(max_pages.saturating_sub(1)) {
        let page = nav.paginate(target).await?;
        walk.pages += 1;

        if page.records.is_empty() {
            warn!("Page {}: no flights", walk.pages);
            continue;
        }
        if let Some(key) = guard.repeated_first(&page.records) {
            warn!("Duplicate page detected at {} - stopping pagination", key);
            walk.halted_on_duplicate = Some(key);
            break;
        }

        log_page(walk.pages, &page.records);
        guard.record(&page.records);
        walk.records.extend(page.records);
    }

    Ok(walk)
}

fn log_page(page: usize, records: &[FlightRecord]) {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => info!(
            "Page {}: {} flights | {} -> {}",
            page,
            records.len(),
            first.designator(),
            last.designator()
        ),
        _ => info!("Page {}: no flights", page),
    }
}

/// Runs the full scrape over a fresh server session per call
pub struct FlightAggregator {
    http: HttpClient,
    config: ScraperConfig,
}

impl FlightAggregator {
    pub fn new(http: HttpClient, config: ScraperConfig) -> Self {
        Self { http, config }
    }
}

impl FlightSource for FlightAggregator {
    fn scrape_all(&self) -> BoxFuture<'_, ScrapeResultOf<ScrapeResult>> {
        async move {
            let filters = Filters::initial(&self.config.airport, self.config.default_window);
            let nav = FormNavigator::new(self.http.session(), filters);
            run_phases(nav, &self.config).await
        }
        .boxed()
    }
}

/// The fixed phase sequence.
///
/// 1. arrivals, default window, all pages
/// 2. departures, default window, all pages
/// 3. arrivals, alternate window, first page only
/// 4. departures, alternate window, first page only
///
/// The alternate window catches near-term flights that the wide window can
/// truncate. Any phase failing aborts the whole scrape.
pub async fn run_phases<T: PageTransport>(
    mut nav: FormNavigator<T>,
    config: &ScraperConfig,
) -> ScrapeResultOf<ScrapeResult> {
    let started = Instant::now();
    let default_window = config.default_window;
    let alternate_window = config.alternate_window;

    let phase = Phase::InitialArrivals;
    let first = nav.load().await.map_err(|e| e.in_phase(phase))?;
    let arrivals_wide = collect_pages(&mut nav, first, config.max_pages)
        .await
        .map_err(|e| e.in_phase(phase))?;

    let phase = Phase::Departures;
    let first = nav
        .select_direction(Direction::Departure)
        .await
        .map_err(|e| e.in_phase(phase))?;
    let departures_wide = collect_pages(&mut nav, first, config.max_pages)
        .await
        .map_err(|e| e.in_phase(phase))?;

    let phase = Phase::RecentArrivals;
    let arrivals_recent = nav
        .select_time_window(Direction::Arrival, alternate_window)
        .await
        .map_err(|e| e.in_phase(phase))?
        .records;
    info!("Arrivals {}: {} flights", alternate_window, arrivals_recent.len());

    let phase = Phase::RecentDepartures;
    let departures_recent = nav
        .select_time_window(Direction::Departure, alternate_window)
        .await
        .map_err(|e| e.in_phase(phase))?
        .records;
    info!("Departures {}: {} flights", alternate_window, departures_recent.len());

    let phases = vec![
        report_walk(Phase::InitialArrivals, Direction::Arrival, default_window, &arrivals_wide),
        report_walk(Phase::Departures, Direction::Departure, default_window, &departures_wide),
        report_single(Phase::RecentArrivals, Direction::Arrival, alternate_window, &arrivals_recent),
        report_single(
            Phase::RecentDepartures,
            Direction::Departure,
            alternate_window,
            &departures_recent,
        ),
    ];

    let mut arrivals = arrivals_wide.records;
    arrivals.extend(arrivals_recent);
    let mut departures = departures_wide.records;
    departures.extend(departures_recent);

    let result = ScrapeResult {
        arrivals,
        departures,
        elapsed: started.elapsed(),
        phases,
    };

    info!(
        "Scrape finished in {:.2}s - arrivals: {}, departures: {}, total: {}",
        result.elapsed.as_secs_f64(),
        result.arrivals.len(),
        result.departures.len(),
        result.total_flights()
    );

    Ok(result)
}

fn report_walk(phase: Phase, direction: Direction, window: TimeWindow, walk: &PageWalk) -> PhaseReport {
    PhaseReport {
        phase,
        direction,
        window,
        pages: walk.pages,
        records: walk.records.len(),
        halted_on_duplicate: walk.halted_on_duplicate.clone(),
    }
}

fn report_single(
    phase: Phase,
    direction: Direction,
    window: TimeWindow,
    records: &[FlightRecord],
) -> PhaseReport {
    PhaseReport {
        phase,
        direction,
        window,
        pages: 1,
        records: records.len(),
        halted_on_duplicate: None,
    }
}
