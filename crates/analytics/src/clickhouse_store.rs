//! ClickHouse-backed event store. Each batch goes through one `INSERT`
//! (RowBinary) so it lands as one unit. Row values never pass through the
//! SQL text.

use async_trait::async_trait;
use clickhouse::Row;
use pulse_core::config::ClickHouseConfig;
use pulse_core::StoredEvent;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::store::{EventStore, StoreError};

/// Flat row layout of the events table, in column order.
#[derive(Debug, Row, Serialize)]
struct EventRow {
    #[serde(with = "clickhouse::serde::uuid")]
    id: Uuid,
    /// `DateTime64(3)` as epoch milliseconds.
    received_at: i64,
    session_id: String,
    page_path: String,
    event_category: String,
    event_action: String,
    event_label: Option<String>,
    event_value: Option<i64>,
    visitor_hash: Option<String>,
    metadata: Option<String>,
}

impl EventRow {
    fn from_stored(stored: &StoredEvent) -> Result<Self, serde_json::Error> {
        let event = &stored.event;
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            id: stored.id,
            received_at: stored.received_at.timestamp_millis(),
            session_id: event.session_id.clone(),
            page_path: event.page_path.clone(),
            event_category: event.event_category.as_str().to_string(),
            event_action: event.event_action.clone(),
            event_label: event.event_label.clone(),
            event_value: event.event_value,
            visitor_hash: event.visitor_hash.clone(),
            metadata,
        })
    }
}

pub struct ClickHouseEventStore {
    client: clickhouse::Client,
    table: String,
}

impl ClickHouseEventStore {
    /// Connect and make sure the events table exists.
    pub async fn new(config: &ClickHouseConfig) -> Result<Self, StoreError> {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        let store = Self::from_client(client, config.table.clone());
        store.ensure_schema().await?;

        info!(url = %config.url, table = %store.table, "ClickHouse event store initialized");
        Ok(store)
    }

    /// Wrap an existing client without touching the schema.
    pub fn from_client(client: clickhouse::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id UUID,
                received_at DateTime64(3),
                session_id String,
                page_path String,
                event_category LowCardinality(String),
                event_action String,
                event_label Nullable(String),
                event_value Nullable(Int64),
                visitor_hash Nullable(String),
                metadata Nullable(String)
            ) ENGINE = MergeTree()
            ORDER BY (received_at, event_category, session_id)
            PARTITION BY toYYYYMM(received_at)",
            self.table
        );
        self.client.query(&ddl).execute().await?;

        info!(table = %self.table, "ClickHouse schema verified");
        Ok(())
    }

    async fn write_rows(&self, rows: &[EventRow]) -> Result<(), clickhouse::error::Error> {
        let mut insert = self.client.insert::<EventRow>(&self.table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await
    }
}

#[async_trait]
impl EventStore for ClickHouseEventStore {
    async fn append(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let rows = events
            .iter()
            .map(EventRow::from_stored)
            .collect::<Result<Vec<_>, _>>()?;

        match self.write_rows(&rows).await {
            Ok(()) => {
                metrics::counter!("storage.events_written").increment(rows.len() as u64);
                debug!(count = rows.len(), "event batch written to ClickHouse");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("storage.write_errors").increment(1);
                error!(error = %e, count = rows.len(), "failed to write event batch");
                Err(e.into())
            }
        }
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }
}
