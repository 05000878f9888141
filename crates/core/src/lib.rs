//! Shared building blocks for the Pulse telemetry pipeline: the event data
//! model, validation rules, configuration, error types and a clock seam.

pub mod clock;
pub mod config;
pub mod error;
pub mod pii;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{PulseError, PulseResult};
pub use types::{EventBatch, EventCategory, Metadata, StoredEvent, TelemetryEvent};
pub use validation::ValidationError;
