/// Unified error handling module
use crate::domain::{FlightView, Phase};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// Failures raised while emulating the flight board protocol
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// A required hidden field is gone; the page layout or session changed.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("upstream answered with HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("scrape aborted during phase '{phase}': {source}")]
    Aggregation {
        phase: Phase,
        #[source]
        source: Box<ScrapeError>,
    },

    #[error("scrape task aborted: {0}")]
    Aborted(String),
}

impl ScrapeError {
    /// Wrap a phase failure, keeping the innermost cause readable.
    pub fn in_phase(self, phase: Phase) -> Self {
        ScrapeError::Aggregation {
            phase,
            source: Box::new(self),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ScrapeError::Protocol(_) => "UPSTREAM_PROTOCOL",
            ScrapeError::Network { .. } => "UPSTREAM_UNREACHABLE",
            ScrapeError::UpstreamStatus { status } => match status {
                403 => "UPSTREAM_403",
                404 => "UPSTREAM_404",
                429 => "UPSTREAM_429",
                500..=599 => "UPSTREAM_5XX",
                _ => "UPSTREAM_ERROR",
            },
            ScrapeError::Aggregation { source, .. } => source.code(),
            ScrapeError::Aborted(_) => "INTERNAL_ERROR",
        }
    }
}

/// Type alias for scrape results
pub type ScrapeResultOf<T> = Result<T, ScrapeError>;

/// Unified error response format.
///
/// Flight collections are always present so consumers can render an
/// empty board instead of special-casing failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
    pub arrivals: Vec<FlightView>,
    pub departures: Vec<FlightView>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Scrape(Arc<ScrapeError>),
    InvalidInput(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Scrape(e) => write!(f, "Scrape failed: {}", e),
            ApiError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<Arc<ScrapeError>> for ApiError {
    fn from(err: Arc<ScrapeError>) -> Self {
        ApiError::Scrape(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Scrape(e) => (StatusCode::BAD_GATEWAY, e.code(), e.to_string()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
            arrivals: Vec::new(),
            departures: Vec::new(),
        };

        (status, Json(error_response)).into_response()
    }
}
