/// HTTP request handlers
use crate::cache::{RefreshCoalescingCache, Snapshot};
use crate::domain::{CacheStats, Diagnostics, FlightView, Health};
use crate::errors::ApiError;
use crate::utils::{filter_by_positions, to_view};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: RefreshCoalescingCache,
    pub utc_offset: FixedOffset,
}

impl AppState {
    fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.utc_offset)
    }
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Serialize)]
pub struct FlightBoard {
    pub arrivals: Vec<FlightView>,
    pub departures: Vec<FlightView>,
    pub fetched_at: DateTime<FixedOffset>,
    pub scrape_time: f64,
    pub total_flights: usize,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

#[derive(Serialize)]
pub struct PositionBoard {
    pub positions: Vec<String>,
    pub flights: Vec<FlightView>,
    pub fetched_at: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

fn board(state: &AppState, snapshot: Snapshot) -> FlightBoard {
    let result = &snapshot.entry.result;
    FlightBoard {
        arrivals: result.arrivals.iter().map(to_view).collect(),
        departures: result.departures.iter().map(to_view).collect(),
        fetched_at: state.local(snapshot.entry.fetched_at),
        scrape_time: (result.elapsed.as_secs_f64() * 100.0).round() / 100.0,
        total_flights: result.total_flights(),
        diagnostics: snapshot.diagnostics,
    }
}

/// Service index
pub async fn index() -> Json<Value> {
    Json(serde_json::json!({
        "service": "flight board API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /flights": "arrivals and departures, cached",
            "GET /flights/positions?pos=01,05": "flights parked at the given stands",
            "GET /health": "service status",
            "GET /stats": "cache statistics",
            "POST /cache/clear": "drop the cached board",
            "POST /cache/refresh": "scrape now"
        }
    }))
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let cache = state.cache.stats();
    let status = if cache.has_data && !cache.is_expired {
        "healthy"
    } else {
        "degraded"
    };
    Json(Health {
        status,
        now: state.local(Utc::now()),
        cache,
    })
}

/// Cached flight board
pub async fn get_flights(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<FlightBoard>>, ApiError> {
    let snapshot = state.cache.get_or_refresh().await?;
    Ok(Json(SuccessResponse::new(board(&state, snapshot))))
}

/// Flights parked at the requested stands
pub async fn get_flights_by_position(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<PositionBoard>>, ApiError> {
    let positions: Vec<String> = params
        .get("pos")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if positions.is_empty() {
        return Err(ApiError::InvalidInput(
            "at least one position is required, e.g. ?pos=01,05".to_string(),
        ));
    }

    let snapshot = state.cache.get_or_refresh().await?;
    let result = &snapshot.entry.result;
    let flights = filter_by_positions(
        result.arrivals.iter().chain(result.departures.iter()),
        &positions,
    );

    Ok(Json(SuccessResponse::new(PositionBoard {
        positions,
        flights: flights.iter().map(to_view).collect(),
        fetched_at: state.local(snapshot.entry.fetched_at),
        diagnostics: snapshot.diagnostics,
    })))
}

/// Cache statistics
pub async fn get_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// Drop the cached board
pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.cache.clear();
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "message": "cache cleared"
    }))))
}

/// Scrape now, ignoring the TTL
pub async fn refresh_cache(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.cache.force_refresh().await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({
            "message": "cache refreshed",
            "flights": snapshot.entry.result.total_flights(),
            "diagnostics": snapshot.diagnostics
        })
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{outage, sample_result, FakeClock, FakeSource};
    use crate::config::CacheConfig;
    use crate::domain::CacheSource;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn state_with(source: FakeSource) -> (AppState, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let cache = RefreshCoalescingCache::new(
            Arc::new(source),
            clock.clone(),
            &CacheConfig { ttl_seconds: 120 },
        );
        let state = AppState {
            cache,
            utc_offset: FixedOffset::west_opt(3 * 3600).unwrap(),
        };
        (state, clock)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_flights_shapes_board() {
        let (state, _) = state_with(FakeSource::new(vec![Ok(sample_result(&["1303"]))]));
        let Json(response) = get_flights(State(state)).await.unwrap();

        assert!(response.ok);
        let board = response.data;
        assert_eq!(board.total_flights, 1);
        assert_eq!(board.arrivals[0].flight, "AR 1303");
        assert_eq!(board.scrape_time, 1.5);
        assert_eq!(board.diagnostics.source, CacheSource::Refreshed);
        assert_eq!(board.fetched_at.offset().local_minus_utc(), -3 * 3600);
    }

    #[tokio::test]
    async fn test_failure_renders_error_with_empty_lists() {
        let (state, _) = state_with(FakeSource::new(vec![Err(outage())]));
        let err = get_flights(State(state)).await.err().unwrap();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "UPSTREAM_UNREACHABLE");
        assert_eq!(body["arrivals"], serde_json::json!([]));
        assert_eq!(body["departures"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_stale_board_carries_warning() {
        let (state, clock) = state_with(FakeSource::new(vec![
            Ok(sample_result(&["1303"])),
            Err(outage()),
        ]));
        get_flights(State(state.clone())).await.unwrap();
        clock.advance(200);

        let Json(response) = get_flights(State(state)).await.unwrap();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["warning"], "stale");
        assert_eq!(value["age_seconds"], 200.0);
        assert_eq!(value["arrivals"][0]["flight"], "AR 1303");
    }

    #[tokio::test]
    async fn test_positions_filter() {
        let (state, _) = state_with(FakeSource::new(vec![]));
        let mut params = HashMap::new();
        params.insert("pos".to_string(), "5, 09".to_string());

        let Json(response) = get_flights_by_position(Query(params), State(state))
            .await
            .unwrap();
        assert_eq!(response.data.positions, vec!["5", "09"]);
        assert_eq!(response.data.flights.len(), 2);
        assert!(response.data.flights.iter().all(|f| f.position == "05"));
    }

    #[tokio::test]
    async fn test_positions_required() {
        let (state, _) = state_with(FakeSource::new(vec![]));
        let err = get_flights_by_position(Query(HashMap::new()), State(state))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_degrades_without_data() {
        let (state, _) = state_with(FakeSource::new(vec![]));
        let Json(before) = health(State(state.clone())).await;
        assert_eq!(before.status, "degraded");

        get_flights(State(state.clone())).await.unwrap();
        let Json(after) = health(State(state)).await;
        assert_eq!(after.status, "healthy");
    }

    #[tokio::test]
    async fn test_clear_then_refresh_endpoints() {
        let (state, _) = state_with(FakeSource::new(vec![]));
        get_flights(State(state.clone())).await.unwrap();

        clear_cache(State(state.clone())).await;
        let Json(stats) = get_stats(State(state.clone())).await;
        assert!(!stats.has_data);

        let Json(refreshed) = refresh_cache(State(state.clone())).await.unwrap();
        assert_eq!(refreshed["ok"], true);
        assert_eq!(refreshed["flights"], 2);
        assert_eq!(state.cache.stats().scrape_count, 2);
    }
}
