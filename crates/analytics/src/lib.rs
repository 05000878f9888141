//! Storage collaborator for validated telemetry events.
//!
//! - [`store`]: the [`EventStore`] seam and an in-memory implementation
//! - [`clickhouse_store`]: ClickHouse-backed store writing one INSERT per batch

pub mod clickhouse_store;
pub mod store;

pub use clickhouse_store::ClickHouseEventStore;
pub use store::{EventStore, MemoryEventStore, StoreError};
