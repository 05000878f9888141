//! REST handlers for telemetry ingestion and operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use crate::ingest::{IngestError, IngestService};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(ingest: Arc<IngestService>, node_id: impl Into<String>) -> Self {
        Self {
            ingest,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /api/analytics/track: a single event or `{ "events": [...] }`.
///
/// The body is taken raw so malformed JSON maps to the same error envelope
/// as every other validation failure.
pub async fn track(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TrackResponse>, IngestError> {
    match state.ingest.ingest(&body).await {
        Ok(count) => {
            metrics::counter!("ingest.accepted_events").increment(count as u64);
            Ok(Json(TrackResponse {
                success: true,
                count,
            }))
        }
        Err(e) => {
            match &e {
                IngestError::Validation(reason) => {
                    debug!(error = %reason, "telemetry batch rejected");
                    metrics::counter!("ingest.validation_errors").increment(1);
                }
                IngestError::RateLimited { .. } => {
                    metrics::counter!("ingest.rate_limited").increment(1);
                }
                IngestError::Storage(_) => {
                    metrics::counter!("ingest.storage_errors").increment(1);
                }
            }
            Err(e)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub store: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        store: state.ingest.store_name().to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
