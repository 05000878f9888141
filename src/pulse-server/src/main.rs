//! Pulse ingestion server.
//!
//! Loads configuration, opens the event store and serves
//! `POST /api/analytics/track`.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use pulse_analytics::{ClickHouseEventStore, EventStore, MemoryEventStore};
use pulse_api::{ApiServer, IngestService};
use pulse_core::config::{AppConfig, StorageBackend};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Memory,
    Clickhouse,
}

impl From<BackendArg> for StorageBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => StorageBackend::Memory,
            BackendArg::Clickhouse => StorageBackend::Clickhouse,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(about = "Behavioral telemetry ingestion server")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "PULSE__NODE_ID")]
    node_id: Option<String>,

    /// Bind address (overrides config)
    #[arg(long, env = "PULSE__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PULSE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Event store backend (overrides config)
    #[arg(long, value_enum, env = "PULSE__STORAGE__BACKEND")]
    storage: Option<BackendArg>,
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn EventStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory event store, events are not persisted");
            Ok(Arc::new(MemoryEventStore::new()))
        }
        StorageBackend::Clickhouse => {
            let store = ClickHouseEventStore::new(&config.storage.clickhouse).await?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_server=info,pulse_api=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Pulse starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.storage {
        config.storage.backend = backend.into();
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        storage = ?config.storage.backend,
        max_batch_size = config.ingest.max_batch_size,
        max_batches_per_window = config.ingest.max_batches_per_window,
        "Configuration loaded"
    );

    let store = open_store(&config).await.map_err(|e| {
        error!(error = %e, backend = ?config.storage.backend, "Failed to open event store");
        e
    })?;

    let ingest = Arc::new(IngestService::from_config(store, &config.ingest));
    let api_server = ApiServer::new(config.clone(), ingest);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Pulse is ready to accept telemetry");

    tokio::select! {
        result = api_server.start_http() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Pulse shut down");
    Ok(())
}
