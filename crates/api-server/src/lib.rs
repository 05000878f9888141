#![warn(clippy::unwrap_used)]

pub mod ingest;
pub mod rest;
pub mod server;

pub use ingest::{IngestError, IngestService};
pub use rest::AppState;
pub use server::{build_router, ApiServer};
