//! Delegated click observer.
//!
//! The host forwards every click to one root handler,
//! [`ClickObserver::handle_click`], which walks the clicked node's ancestry
//! for the nearest marker attribute. Marker values are `label` or
//! `category:label`. Clicks on the same marker inside the debounce window
//! are dropped; tracking failures never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::clock::Clock;
use pulse_core::validation::{metadata_from, MAX_ACTION_LEN};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::Tracker;
use crate::events::DEFAULT_CLICK_CATEGORY;

/// Debounce entries kept before stale ones are pruned.
const DEBOUNCE_PRUNE_THRESHOLD: usize = 256;

/// A node that can receive clicks.
pub trait InteractionTarget {
    fn attribute(&self, name: &str) -> Option<String>;
    fn parent(&self) -> Option<&dyn InteractionTarget>;
}

/// Snapshot of a DOM-like element and its ancestry.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub parent: Option<Arc<Element>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn child_of(mut self, parent: Arc<Element>) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl InteractionTarget for Element {
    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    fn parent(&self) -> Option<&dyn InteractionTarget> {
        self.parent.as_deref().map(|p| p as &dyn InteractionTarget)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickObserverConfig {
    pub attribute: String,
    pub conversion_attribute: String,
    pub debounce_ms: i64,
    pub enabled: bool,
}

impl Default for ClickObserverConfig {
    fn default() -> Self {
        Self {
            attribute: "data-track-click".to_string(),
            conversion_attribute: "data-track-conversion".to_string(),
            debounce_ms: 300,
            enabled: true,
        }
    }
}

/// What the observer did with a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Disabled,
    Unmarked,
    Debounced,
    /// Passed the debounce but not recorded: do-not-track is active or the
    /// event failed validation.
    Suppressed,
    /// Click recorded; `conversion` is set when a conversion was recorded too.
    Tracked {
        category: String,
        label: String,
        conversion: Option<String>,
    },
}

pub struct ClickObserver {
    tracker: Tracker,
    clock: Arc<dyn Clock>,
    config: ClickObserverConfig,
    last_click: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ClickObserver {
    pub fn new(tracker: Tracker, clock: Arc<dyn Clock>, config: ClickObserverConfig) -> Self {
        Self {
            tracker,
            clock,
            config,
            last_click: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClickObserverConfig {
        &self.config
    }

    /// Root click handler.
    pub fn handle_click(&self, target: &dyn InteractionTarget) -> ClickOutcome {
        if !self.config.enabled {
            return ClickOutcome::Disabled;
        }

        let Some((element, raw)) = closest(target, &self.config.attribute) else {
            return ClickOutcome::Unmarked;
        };
        let marker = sanitize_marker(&raw);
        let Some((category, label)) = parse_marker(&marker) else {
            return ClickOutcome::Unmarked;
        };

        if self.is_debounced(&marker) {
            return ClickOutcome::Debounced;
        }

        if self.tracker.do_not_track().is_active() {
            return ClickOutcome::Suppressed;
        }
        if let Err(e) = self.tracker.track_click(&category, &label) {
            debug!(error = %e, marker = %marker, "click not tracked");
            return ClickOutcome::Suppressed;
        }

        let conversion = element
            .attribute(&self.config.conversion_attribute)
            .map(|raw| sanitize_marker(&raw))
            .filter(|kind| !kind.is_empty())
            .and_then(|kind| self.record_conversion(kind, &category, &label));

        ClickOutcome::Tracked {
            category,
            label,
            conversion,
        }
    }

    fn record_conversion(&self, kind: String, category: &str, label: &str) -> Option<String> {
        let metadata = metadata_from([
            ("category", serde_json::json!(category)),
            ("label", serde_json::json!(label)),
        ]);
        match self.tracker.track_conversion(&kind, Some(metadata)) {
            Ok(()) => Some(kind),
            Err(e) => {
                debug!(error = %e, conversion = %kind, "conversion not tracked");
                None
            }
        }
    }

    /// Returns `true` when `marker` was accepted within the debounce window;
    /// otherwise records this click as the marker's latest.
    fn is_debounced(&self, marker: &str) -> bool {
        let now = self.clock.now();
        let window = Duration::milliseconds(self.config.debounce_ms);
        let mut last_click = self.last_click.lock();

        if let Some(previous) = last_click.get(marker) {
            if now - *previous < window {
                return true;
            }
        }
        if last_click.len() >= DEBOUNCE_PRUNE_THRESHOLD {
            last_click.retain(|_, at| now - *at < window);
        }
        last_click.insert(marker.to_string(), now);
        false
    }
}

/// Nearest node, starting at `target` itself, carrying `attribute`.
fn closest<'a>(
    target: &'a dyn InteractionTarget,
    attribute: &str,
) -> Option<(&'a dyn InteractionTarget, String)> {
    let mut node = Some(target);
    while let Some(current) = node {
        if let Some(value) = current.attribute(attribute) {
            return Some((current, value));
        }
        node = current.parent();
    }
    None
}

/// Keep `[A-Za-z0-9_:-]`, then cap the length.
pub fn sanitize_marker(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'))
        .take(MAX_ACTION_LEN)
        .collect()
}

/// Split a sanitized marker into `(category, label)`. Only the first colon
/// matters; anything after a second colon is ignored.
fn parse_marker(marker: &str) -> Option<(String, String)> {
    let mut parts = marker.split(':');
    let first = parts.next().unwrap_or_default();
    let (category, label) = match parts.next() {
        Some(label) if first.is_empty() => (DEFAULT_CLICK_CATEGORY, label),
        Some(label) => (first, label),
        None => (DEFAULT_CLICK_CATEGORY, first),
    };
    if label.is_empty() {
        return None;
    }
    Some((category.to_string(), label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DoNotTrack, TrackerConfig};
    use crate::session::SessionManager;
    use crate::transport::{CaptureTransport, Transport};
    use pulse_core::clock::ManualClock;

    struct Fixture {
        observer: ClickObserver,
        tracker: Tracker,
        clock: Arc<ManualClock>,
        capture: Arc<CaptureTransport>,
    }

    fn fixture(config: ClickObserverConfig) -> Fixture {
        fixture_with(config, TrackerConfig::default())
    }

    fn fixture_with(config: ClickObserverConfig, tracker_config: TrackerConfig) -> Fixture {
        let clock = ManualClock::starting_now();
        let (transport, capture) = Transport::capture();
        let tracker = Tracker::new(
            tracker_config,
            SessionManager::in_memory(clock.clone()),
            transport,
            DoNotTrack::default(),
        );
        let observer = ClickObserver::new(tracker.clone(), clock.clone(), config);
        Fixture {
            observer,
            tracker,
            clock,
            capture,
        }
    }

    fn flushed_events(f: &Fixture) -> Vec<serde_json::Value> {
        f.tracker.flush_events();
        f.capture
            .payloads()
            .into_iter()
            .flat_map(|p| p["events"].as_array().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_marker_found_on_ancestor() {
        let f = fixture(ClickObserverConfig::default());
        let button = Arc::new(Element::new("a").with_attribute("data-track-click", "nav:pricing"));
        let icon = Element::new("svg").child_of(button);

        let outcome = f.observer.handle_click(&icon);
        assert_eq!(
            outcome,
            ClickOutcome::Tracked {
                category: "nav".into(),
                label: "pricing".into(),
                conversion: None,
            }
        );

        let events = flushed_events(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventCategory"], "click");
        assert_eq!(events[0]["eventAction"], "nav");
        assert_eq!(events[0]["eventLabel"], "pricing");
    }

    #[test]
    fn test_unmarked_click_ignored() {
        let f = fixture(ClickObserverConfig::default());
        let div = Element::new("div").child_of(Arc::new(Element::new("body")));
        assert_eq!(f.observer.handle_click(&div), ClickOutcome::Unmarked);
        assert_eq!(f.tracker.queued_count(), 0);
    }

    #[test]
    fn test_default_category_and_extra_segments() {
        assert_eq!(parse_marker("hero"), Some(("cta".into(), "hero".into())));
        assert_eq!(parse_marker("nav:docs:extra"), Some(("nav".into(), "docs".into())));
        assert_eq!(parse_marker(":docs"), Some(("cta".into(), "docs".into())));
        assert_eq!(parse_marker("nav:"), None);
        assert_eq!(parse_marker(""), None);
    }

    #[test]
    fn test_sanitize_strips_and_truncates() {
        assert_eq!(sanitize_marker("cta:<script>alert(1)</script>"), "cta:scriptalert1script");
        assert_eq!(sanitize_marker("sign up!"), "signup");
        assert_eq!(sanitize_marker(&"a".repeat(150)).len(), 100);
    }

    #[test]
    fn test_same_marker_debounced() {
        let f = fixture(ClickObserverConfig::default());
        let button = Element::new("button").with_attribute("data-track-click", "hero");

        assert!(matches!(f.observer.handle_click(&button), ClickOutcome::Tracked { .. }));
        f.clock.advance(Duration::milliseconds(120));
        assert_eq!(f.observer.handle_click(&button), ClickOutcome::Debounced);
        f.clock.advance(Duration::milliseconds(300));
        assert!(matches!(f.observer.handle_click(&button), ClickOutcome::Tracked { .. }));

        assert_eq!(flushed_events(&f).len(), 2);
    }

    #[test]
    fn test_different_markers_not_debounced() {
        let f = fixture(ClickObserverConfig::default());
        let a = Element::new("button").with_attribute("data-track-click", "hero");
        let b = Element::new("button").with_attribute("data-track-click", "footer");

        f.observer.handle_click(&a);
        f.clock.advance(Duration::milliseconds(50));
        f.observer.handle_click(&b);

        assert_eq!(flushed_events(&f).len(), 2);
    }

    #[test]
    fn test_conversion_marker_records_conversion() {
        let f = fixture(ClickObserverConfig::default());
        let button = Element::new("button")
            .with_attribute("data-track-click", "pricing:pro_plan")
            .with_attribute("data-track-conversion", "trial start!");

        let outcome = f.observer.handle_click(&button);
        assert!(matches!(
            outcome,
            ClickOutcome::Tracked { conversion: Some(ref kind), .. } if kind == "trialstart"
        ));

        let events = flushed_events(&f);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["eventCategory"], "conversion");
        assert_eq!(events[1]["eventAction"], "trialstart");
        assert_eq!(events[1]["metadata"]["label"], "pro_plan");
    }

    #[test]
    fn test_disabled_and_custom_attribute() {
        let disabled = fixture(ClickObserverConfig {
            enabled: false,
            ..Default::default()
        });
        let button = Element::new("button").with_attribute("data-track-click", "hero");
        assert_eq!(disabled.observer.handle_click(&button), ClickOutcome::Disabled);
        assert_eq!(disabled.tracker.queued_count(), 0);

        let custom = fixture(ClickObserverConfig {
            attribute: "data-test-track".into(),
            ..Default::default()
        });
        assert_eq!(custom.observer.handle_click(&button), ClickOutcome::Unmarked);
        let marked = Element::new("button").with_attribute("data-test-track", "hero");
        assert!(matches!(custom.observer.handle_click(&marked), ClickOutcome::Tracked { .. }));
    }

    #[test]
    fn test_tracking_failure_is_swallowed() {
        // An oversized visitor hash makes every event fail validation.
        let f = fixture_with(
            ClickObserverConfig::default(),
            TrackerConfig {
                visitor_hash: Some("h".repeat(65)),
                ..Default::default()
            },
        );
        let button = Element::new("button")
            .with_attribute("data-track-click", "hero")
            .with_attribute("data-track-conversion", "signup");

        assert_eq!(f.observer.handle_click(&button), ClickOutcome::Suppressed);
        assert_eq!(f.tracker.queued_count(), 0);
    }

    #[test]
    fn test_do_not_track_reports_suppressed() {
        let f = fixture(ClickObserverConfig::default());
        f.tracker.do_not_track().set(true);
        let button = Element::new("button").with_attribute("data-track-click", "hero");

        assert_eq!(f.observer.handle_click(&button), ClickOutcome::Suppressed);
        assert_eq!(f.tracker.queued_count(), 0);

        f.tracker.do_not_track().set(false);
        f.clock.advance(Duration::milliseconds(400));
        assert!(matches!(f.observer.handle_click(&button), ClickOutcome::Tracked { .. }));
    }

    #[test]
    fn test_marker_truncated_before_split() {
        let f = fixture(ClickObserverConfig::default());
        let marker = format!("{}:label", "c".repeat(99));
        let button = Element::new("button").with_attribute("data-track-click", marker);
        assert_eq!(f.observer.handle_click(&button), ClickOutcome::Unmarked);
    }
}
