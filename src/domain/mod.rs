/// Domain models for the application
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Flight direction, as selected by the movement-type filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Arrival,
    Departure,
}

impl Direction {
    /// Value submitted in the movement-type field
    pub fn form_code(self) -> &'static str {
        match self {
            Direction::Arrival => "A",
            Direction::Departure => "D",
        }
    }

    /// Element id of the results grid for this direction
    pub fn grid_id(self) -> &'static str {
        match self {
            Direction::Arrival => "dgGrillaA",
            Direction::Departure => "dgGrillaD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Arrival => write!(f, "arrivals"),
            Direction::Departure => write!(f, "departures"),
        }
    }
}

/// Signed hour offset from "now" used by the time-window filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TimeWindow(pub i32);

impl TimeWindow {
    pub fn form_value(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}h", self.0)
    }
}

/// The three opaque hidden fields echoed back on every postback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub generator: String,
    pub payload: String,
    pub validation: String,
}

/// Ordered form body for one postback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormRequest {
    fields: Vec<(String, String)>,
}

impl FormRequest {
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// One row of a results grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightRecord {
    pub direction: Direction,
    pub airline: String,
    pub number: String,
    /// Origin for arrivals, destination for departures
    pub location: String,
    pub scheduled: String,
    pub estimated: String,
    pub actual: String,
    pub registration: String,
    pub position: String,
    pub gate_or_belt: String,
    pub remark: String,
    /// Columns with no dedicated field, keyed by canonical header
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl FlightRecord {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            airline: String::new(),
            number: String::new(),
            location: String::new(),
            scheduled: String::new(),
            estimated: String::new(),
            actual: String::new(),
            registration: String::new(),
            position: String::new(),
            gate_or_belt: String::new(),
            remark: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Airline plus number, as the board renders it
    pub fn designator(&self) -> String {
        format!("{} {}", self.airline, self.number).trim().to_string()
    }

    /// Key used for duplicate-page detection
    pub fn dedup_key(&self) -> String {
        self.designator()
    }
}

/// Records of one grid page plus the pager targets found in its footer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub records: Vec<FlightRecord>,
    pub pager_targets: Vec<String>,
}

/// Fixed steps of a full scrape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    InitialArrivals,
    Departures,
    RecentArrivals,
    RecentDepartures,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::InitialArrivals => "arrivals, default window",
            Phase::Departures => "departures, default window",
            Phase::RecentArrivals => "arrivals, alternate window",
            Phase::RecentDepartures => "departures, alternate window",
        };
        write!(f, "{}", label)
    }
}

/// What one phase contributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub direction: Direction,
    pub window: TimeWindow,
    pub pages: usize,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_on_duplicate: Option<String>,
}

/// Combined output of the four-phase scrape
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub arrivals: Vec<FlightRecord>,
    pub departures: Vec<FlightRecord>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub phases: Vec<PhaseReport>,
}

impl ScrapeResult {
    pub fn total_flights(&self) -> usize {
        self.arrivals.len() + self.departures.len()
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((d.as_secs_f64() * 100.0).round() / 100.0)
}

/// Published snapshot; replaced wholesale, never mutated
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: ScrapeResult,
    pub fetched_at: DateTime<Utc>,
    pub scrape_count: u64,
}

/// How a cache answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Served from a snapshot inside its TTL
    Hit,
    /// This caller started the scrape that produced the snapshot
    Refreshed,
    /// This caller joined a scrape started by someone else
    Coalesced,
    /// Scrape failed, previous snapshot served instead
    Stale,
}

/// Per-call metadata returned next to the snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub source: CacheSource,
    pub age_seconds: f64,
    pub scrape_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cache counters and state
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub hit_rate: f64,
    pub scrape_count: u64,
    pub cache_age: Option<f64>,
    pub ttl: u64,
    pub is_expired: bool,
    pub has_data: bool,
    pub last_error: Option<String>,
    pub refresh_in_progress: bool,
}

/// Flattened flight for API consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightView {
    pub flight: String,
    pub place: String,
    pub date: String,
    pub scheduled: String,
    pub estimated: String,
    pub actual: String,
    pub registration: String,
    pub position: String,
    pub gate_or_belt: String,
    pub status: String,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<chrono::FixedOffset>,
    pub cache: CacheStats,
}
