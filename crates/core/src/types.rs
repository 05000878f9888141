use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Flat key-value bag attached to an event.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Closed set of event categories accepted by the ingestion endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Scroll,
    Click,
    Engagement,
    Conversion,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Scroll,
        EventCategory::Click,
        EventCategory::Engagement,
        EventCategory::Conversion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Scroll => "scroll",
            EventCategory::Click => "click",
            EventCategory::Engagement => "engagement",
            EventCategory::Conversion => "conversion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single behavioral telemetry event, in its wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub session_id: String,
    pub page_path: String,
    pub event_category: EventCategory,
    pub event_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Request body carrying several events at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<TelemetryEvent>,
}

/// A validated event as handed to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

impl StoredEvent {
    pub fn new(event: TelemetryEvent, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at,
            event,
        }
    }
}
