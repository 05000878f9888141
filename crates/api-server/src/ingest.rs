//! Ingestion pipeline behind `POST /api/analytics/track`.
//!
//! A request body goes through parse and validate, rate limiting on the
//! first event's session id, then one append to the event store. Malformed
//! requests never touch the limiter.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use pulse_analytics::{EventStore, StoreError};
use pulse_core::config::IngestConfig;
use pulse_core::validation::parse_payload;
use pulse_core::{Clock, StoredEvent, SystemClock, ValidationError};
use pulse_platform::{RateLimitConfig, RateLimiter};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Rate limit exceeded")]
    RateLimited {
        session_id: String,
        reset_at: DateTime<Utc>,
    },

    #[error("Internal server error")]
    Storage(#[source] StoreError),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub struct IngestService {
    store: Arc<dyn EventStore>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    max_batch: usize,
    sweep_probability: f64,
}

impl IngestService {
    pub fn new(store: Arc<dyn EventStore>, limiter: Arc<RateLimiter>, config: &IngestConfig) -> Self {
        Self {
            store,
            limiter,
            clock: Arc::new(SystemClock),
            max_batch: config.max_batch_size,
            sweep_probability: config.sweep_probability,
        }
    }

    /// Service with an in-process limiter sized from `config`.
    pub fn from_config(store: Arc<dyn EventStore>, config: &IngestConfig) -> Self {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: config.max_batches_per_window,
            window_secs: config.window_secs,
        });
        Self::new(store, Arc::new(limiter), config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Validate, rate-limit and persist one request body. Returns the number
    /// of events stored.
    pub async fn ingest(&self, body: &[u8]) -> Result<usize, IngestError> {
        let events = parse_payload(body, self.max_batch)?;
        let now = self.clock.now();

        if self.should_sweep() {
            let swept = self.limiter.sweep(now);
            if swept > 0 {
                metrics::counter!("ratelimit.swept").increment(swept as u64);
                debug!(swept = swept, "expired rate-limit windows removed");
            }
        }

        // parse_payload guarantees at least one event
        let session_id = events
            .first()
            .map(|event| event.session_id.clone())
            .unwrap_or_default();

        let verdict = self.limiter.check_at(&session_id, now);
        if !verdict.allowed {
            warn!(
                session_id = %session_id,
                count = verdict.count,
                limit = verdict.limit,
                "batch rate limited"
            );
            return Err(IngestError::RateLimited {
                session_id,
                reset_at: verdict.reset_at,
            });
        }

        let stored: Vec<StoredEvent> = events
            .into_iter()
            .map(|event| StoredEvent::new(event, now))
            .collect();

        if let Err(e) = self.store.append(&stored).await {
            error!(
                error = %e,
                store = self.store.name(),
                count = stored.len(),
                "failed to persist telemetry batch"
            );
            return Err(IngestError::Storage(e));
        }

        debug!(session_id = %session_id, count = stored.len(), "telemetry batch stored");
        Ok(stored.len())
    }

    fn should_sweep(&self) -> bool {
        let p = self.sweep_probability;
        if p.is_nan() || p <= 0.0 {
            false
        } else if p >= 1.0 {
            true
        } else {
            rand::thread_rng().gen_bool(p)
        }
    }
}
