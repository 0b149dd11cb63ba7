/// Flight board service: scrapes the legacy board and serves it from a refresh-coalescing cache
mod cache;
mod clients;
mod config;
mod domain;
mod errors;
mod handlers;
mod navigator;
mod parser;
mod routes;
mod services;
mod utils;

use crate::cache::{RefreshCoalescingCache, SystemClock};
use crate::clients::HttpClient;
use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::routes::build_router;
use crate::services::FlightAggregator;
use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!(
        "Configuration loaded - upstream {} (airport {}, ttl {}s)",
        config.scraper.base_url, config.scraper.airport, config.cache.ttl_seconds
    );

    let utc_offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("UTC_OFFSET_HOURS out of range"))?;

    // Shared connection pool; each scrape opens its own session on it
    let http = HttpClient::new(&config.scraper)?;
    let aggregator = FlightAggregator::new(http, config.scraper.clone());

    let cache = RefreshCoalescingCache::new(
        Arc::new(aggregator),
        Arc::new(SystemClock),
        &config.cache,
    );

    if config.refresh_every_seconds > 0 {
        start_background_refresh(cache.clone(), config.refresh_every_seconds);
    }

    let state = AppState { cache, utc_offset };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("flight_board listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Keep the board warm so request handlers rarely wait on a scrape
fn start_background_refresh(cache: RefreshCoalescingCache, interval: u64) {
    tokio::spawn(async move {
        info!("Starting background refresh task (interval: {}s)", interval);
        loop {
            if let Err(e) = cache.force_refresh().await {
                error!("Background refresh error: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    });
}
