//! HTTP server hosting the ingestion route and the metrics exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use pulse_core::config::AppConfig;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ingest::IngestService;
use crate::rest::{self, AppState};

pub const TRACK_ROUTE: &str = "/api/analytics/track";

/// Router with the ingestion route, probes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(TRACK_ROUTE, post(rest::track))
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    ingest: Arc<IngestService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, ingest: Arc<IngestService>) -> Self {
        Self { config, ingest }
    }

    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState::new(self.ingest.clone(), self.config.node_id.clone());
        let app = build_router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, store = self.ingest.store_name(), "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder with its own HTTP listener.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
