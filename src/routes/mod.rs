/// Application routes configuration
use crate::handlers::{
    clear_cache, get_flights, get_flights_by_position, get_stats, health, index, refresh_cache,
    AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        // Health check
        .route("/health", get(health))
        // Flight board
        .route("/flights", get(get_flights))
        .route("/flights/positions", get(get_flights_by_position))
        // Cache management
        .route("/stats", get(get_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/refresh", post(refresh_cache))
        .with_state(state)
}
