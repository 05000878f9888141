//! Event validation rules shared by the client collector and the ingestion
//! endpoint.
//!
//! Rules are applied field by field in a fixed order and the first violation
//! wins. The `Display` text of every [`ValidationError`] is the exact message
//! returned to HTTP callers.

use serde_json::Value;
use thiserror::Error;

use crate::pii::contains_email;
use crate::types::{EventCategory, Metadata, TelemetryEvent};

pub const MAX_SESSION_ID_LEN: usize = 36;
pub const MAX_PAGE_PATH_LEN: usize = 500;
pub const MAX_ACTION_LEN: usize = 100;
pub const MAX_LABEL_LEN: usize = 200;
pub const MAX_VISITOR_HASH_LEN: usize = 64;
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("events must be an array")]
    EventsNotArray,

    #[error("No events provided")]
    Empty,

    #[error("Batch too large (max {max})")]
    BatchTooLarge { max: usize },

    #[error("Event must be an object")]
    EventNotObject,

    #[error("sessionId is required")]
    MissingSessionId,

    #[error("sessionId too long (max 36)")]
    SessionIdTooLong,

    #[error("pagePath is required")]
    MissingPagePath,

    #[error("pagePath too long (max 500)")]
    PagePathTooLong,

    #[error("eventCategory is required")]
    MissingCategory,

    #[error("Invalid event category")]
    InvalidCategory,

    #[error("eventAction is required")]
    MissingAction,

    #[error("eventAction too long (max 100)")]
    ActionTooLong,

    #[error("eventLabel must be a string")]
    LabelNotString,

    #[error("eventLabel too long (max 200)")]
    LabelTooLong,

    #[error("eventLabel must not contain PII")]
    LabelContainsPii,

    #[error("eventValue must be an integer")]
    ValueNotInteger,

    #[error("visitorHash must be a string")]
    VisitorHashNotString,

    #[error("visitorHash too long (max 64)")]
    VisitorHashTooLong,

    #[error("metadata must be an object")]
    MetadataNotObject,
}

/// Parse a raw request body into validated events.
///
/// Accepts either a single event object or `{"events": [...]}`.
pub fn parse_payload(body: &[u8], max_batch: usize) -> Result<Vec<TelemetryEvent>, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ValidationError::InvalidJson)?;
    let raw = normalize(value)?;

    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }
    if raw.len() > max_batch {
        return Err(ValidationError::BatchTooLarge { max: max_batch });
    }

    raw.iter().map(validate_event).collect()
}

/// Normalize a decoded body into a list of raw events.
pub fn normalize(value: Value) -> Result<Vec<Value>, ValidationError> {
    match value {
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            Some(_) => Err(ValidationError::EventsNotArray),
            None => Ok(vec![Value::Object(map)]),
        },
        _ => Err(ValidationError::EventNotObject),
    }
}

/// Validate one raw event and convert it into its typed form.
pub fn validate_event(value: &Value) -> Result<TelemetryEvent, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::EventNotObject)?;

    let session_id = required_str(obj.get("sessionId"))
        .ok_or(ValidationError::MissingSessionId)?;
    check_session_id(session_id)?;

    let page_path = required_str(obj.get("pagePath")).ok_or(ValidationError::MissingPagePath)?;
    check_page_path(page_path)?;

    let event_category = match present(obj.get("eventCategory")) {
        None => return Err(ValidationError::MissingCategory),
        Some(v) => v
            .as_str()
            .and_then(EventCategory::parse)
            .ok_or(ValidationError::InvalidCategory)?,
    };

    let event_action = required_str(obj.get("eventAction")).ok_or(ValidationError::MissingAction)?;
    check_action(event_action)?;

    let event_label = match present(obj.get("eventLabel")) {
        None => None,
        Some(v) => {
            let label = v.as_str().ok_or(ValidationError::LabelNotString)?;
            check_label(label)?;
            Some(label.to_string())
        }
    };

    let event_value = match present(obj.get("eventValue")) {
        None => None,
        Some(v) => Some(as_integer(v).ok_or(ValidationError::ValueNotInteger)?),
    };

    let visitor_hash = match present(obj.get("visitorHash")) {
        None => None,
        Some(v) => {
            let hash = v.as_str().ok_or(ValidationError::VisitorHashNotString)?;
            check_visitor_hash(hash)?;
            Some(hash.to_string())
        }
    };

    let metadata = match present(obj.get("metadata")) {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(ValidationError::MetadataNotObject),
    };

    Ok(TelemetryEvent {
        session_id: session_id.to_string(),
        page_path: page_path.to_string(),
        event_category,
        event_action: event_action.to_string(),
        event_label,
        event_value,
        visitor_hash,
        metadata,
    })
}

impl TelemetryEvent {
    /// Apply the same rules as [`validate_event`] to an already typed event.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session_id.is_empty() {
            return Err(ValidationError::MissingSessionId);
        }
        check_session_id(&self.session_id)?;
        if self.page_path.is_empty() {
            return Err(ValidationError::MissingPagePath);
        }
        check_page_path(&self.page_path)?;
        if self.event_action.is_empty() {
            return Err(ValidationError::MissingAction);
        }
        check_action(&self.event_action)?;
        if let Some(label) = &self.event_label {
            check_label(label)?;
        }
        if let Some(hash) = &self.visitor_hash {
            check_visitor_hash(hash)?;
        }
        Ok(())
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn required_str(value: Option<&Value>) -> Option<&str> {
    present(value)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn check_session_id(id: &str) -> Result<(), ValidationError> {
    if char_len(id) > MAX_SESSION_ID_LEN {
        return Err(ValidationError::SessionIdTooLong);
    }
    Ok(())
}

fn check_page_path(path: &str) -> Result<(), ValidationError> {
    if char_len(path) > MAX_PAGE_PATH_LEN {
        return Err(ValidationError::PagePathTooLong);
    }
    Ok(())
}

fn check_action(action: &str) -> Result<(), ValidationError> {
    if char_len(action) > MAX_ACTION_LEN {
        return Err(ValidationError::ActionTooLong);
    }
    Ok(())
}

fn check_label(label: &str) -> Result<(), ValidationError> {
    if char_len(label) > MAX_LABEL_LEN {
        return Err(ValidationError::LabelTooLong);
    }
    if contains_email(label) {
        return Err(ValidationError::LabelContainsPii);
    }
    Ok(())
}

fn check_visitor_hash(hash: &str) -> Result<(), ValidationError> {
    if char_len(hash) > MAX_VISITOR_HASH_LEN {
        return Err(ValidationError::VisitorHashTooLong);
    }
    Ok(())
}

/// Integral JSON numbers only; `25.0` counts, `25.5` does not.
fn as_integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    let f = number.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Convenience for building metadata maps from pairs.
pub fn metadata_from<I, K>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
