//! Event queue and batcher. This is the client-side entry point every capturer
//! feeds. Events are stamped with the session id and current page, checked
//! against the ingestion rules, and buffered until a size or time trigger
//! flushes them through the [`Transport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pulse_core::validation::MAX_BATCH_SIZE;
use pulse_core::{EventBatch, EventCategory, Metadata, PulseResult, TelemetryEvent};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::events::{scroll_action, PageLifecycle, TIME_ON_PAGE_ACTION};
use crate::session::SessionManager;
use crate::transport::Transport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub endpoint: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub visitor_hash: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/analytics/track".to_string(),
            batch_size: MAX_BATCH_SIZE,
            flush_interval_ms: 3_000,
            visitor_hash: None,
        }
    }
}

/// Shared do-not-track switch. When active, tracking is a silent no-op.
#[derive(Debug, Clone, Default)]
pub struct DoNotTrack(Arc<AtomicBool>);

impl DoNotTrack {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct TrackerState {
    queue: Vec<TelemetryEvent>,
    initialized: bool,
    timer: Option<JoinHandle<()>>,
    page_path: String,
}

struct TrackerInner {
    config: TrackerConfig,
    sessions: SessionManager,
    transport: Transport,
    do_not_track: DoNotTrack,
    state: Mutex<TrackerState>,
}

impl TrackerInner {
    fn flush(&self, teardown: bool) -> usize {
        let batch = std::mem::take(&mut self.state.lock().queue);
        self.send(batch, teardown)
    }

    fn send(&self, events: Vec<TelemetryEvent>, teardown: bool) -> usize {
        if events.is_empty() {
            return 0;
        }
        let count = events.len();
        match serde_json::to_vec(&EventBatch { events }) {
            Ok(body) => {
                self.transport.send(Bytes::from(body), teardown);
                debug!(count = count, teardown = teardown, "telemetry batch flushed");
                count
            }
            Err(e) => {
                error!(error = %e, count = count, "failed to serialize telemetry batch");
                0
            }
        }
    }
}

/// Client-side telemetry collector. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        sessions: SessionManager,
        transport: Transport,
        do_not_track: DoNotTrack,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                sessions,
                transport,
                do_not_track,
                state: Mutex::new(TrackerState {
                    page_path: "/".to_string(),
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn do_not_track(&self) -> &DoNotTrack {
        &self.inner.do_not_track
    }

    /// Set the page subsequent events are attributed to.
    pub fn set_page_path(&self, path: impl Into<String>) {
        self.inner.state.lock().page_path = path.into();
    }

    pub fn page_path(&self) -> String {
        self.inner.state.lock().page_path.clone()
    }

    /// Queue one event. Returns `Ok` without queuing when do-not-track is
    /// active; returns a validation error when the event is malformed.
    pub fn track_event(
        &self,
        category: EventCategory,
        action: &str,
        label: Option<&str>,
        value: Option<i64>,
        metadata: Option<Metadata>,
    ) -> PulseResult<()> {
        if self.inner.do_not_track.is_active() {
            return Ok(());
        }

        let session_id = self.inner.sessions.get_session_id();
        let event = TelemetryEvent {
            session_id,
            page_path: self.page_path(),
            event_category: category,
            event_action: action.to_string(),
            event_label: label.map(str::to_string),
            event_value: value,
            visitor_hash: self.inner.config.visitor_hash.clone(),
            metadata,
        };
        event.validate()?;

        let full_batch = {
            let mut state = self.inner.state.lock();
            state.queue.push(event);
            if state.queue.len() >= self.batch_limit() {
                Some(std::mem::take(&mut state.queue))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.inner.send(batch, false);
        }
        Ok(())
    }

    /// Queue length that triggers a flush. Never above what the server
    /// accepts in one batch.
    pub fn batch_limit(&self) -> usize {
        self.inner.config.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn track_scroll(&self, percent: u8) -> PulseResult<()> {
        self.track_event(
            EventCategory::Scroll,
            &scroll_action(percent),
            None,
            Some(i64::from(percent)),
            None,
        )
    }

    pub fn track_click(&self, category: &str, label: &str) -> PulseResult<()> {
        self.track_event(EventCategory::Click, category, Some(label), None, None)
    }

    pub fn track_conversion(&self, kind: &str, metadata: Option<Metadata>) -> PulseResult<()> {
        self.track_event(EventCategory::Conversion, kind, None, None, metadata)
    }

    pub fn track_engagement(&self, millis: i64) -> PulseResult<()> {
        self.track_event(
            EventCategory::Engagement,
            TIME_ON_PAGE_ACTION,
            None,
            Some(millis),
            None,
        )
    }

    /// Send everything queued through the ordinary request path. Returns the
    /// number of events handed to the transport; an empty queue is a no-op.
    pub fn flush_events(&self) -> usize {
        self.inner.flush(false)
    }

    /// Send everything queued through the non-blocking teardown path.
    pub fn flush_on_teardown(&self) -> usize {
        self.inner.flush(true)
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Start the periodic flush timer and enable lifecycle handling. Runs at
    /// most once; returns whether this call did the initialization.
    pub fn init_tracking(&self) -> bool {
        if self.inner.do_not_track.is_active() {
            debug!("do-not-track active, tracking not initialized");
            return false;
        }

        let mut state = self.inner.state.lock();
        if state.initialized {
            return false;
        }
        state.initialized = true;

        let period = Duration::from_millis(self.inner.config.flush_interval_ms.max(1));
        match Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.inner);
                state.timer = Some(handle.spawn(periodic_flush(weak, period)));
            }
            Err(_) => debug!("no async runtime available, periodic flush disabled"),
        }

        info!(flush_interval_ms = period.as_millis() as u64, "telemetry tracking initialized");
        true
    }

    /// Final flush, then reset queue, timer and the initialized flag.
    pub fn teardown_tracking(&self) -> usize {
        let pending = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.initialized = false;
            std::mem::take(&mut state.queue)
        };
        let flushed = self.inner.send(pending, false);

        debug!(flushed = flushed, "telemetry tracking torn down");
        flushed
    }

    /// React to a page lifecycle transition forwarded by the host.
    pub fn handle_lifecycle(&self, event: PageLifecycle) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        debug!(event = ?event, "page lifecycle transition");
        self.inner.flush(true)
    }
}

async fn periodic_flush(inner: Weak<TrackerInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.flush(false);
    }
}

/// Path component of a page URL. Relative paths pass through with any
/// query or fragment removed.
pub fn page_path_from_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            let end = raw.find(['?', '#']).unwrap_or(raw.len());
            let path = &raw[..end];
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CaptureTransport, DeliveryMode};
    use pulse_core::clock::ManualClock;
    use pulse_core::PulseError;

    fn tracker_with(config: TrackerConfig, dnt: bool) -> (Tracker, Arc<CaptureTransport>) {
        let (transport, capture) = Transport::capture();
        let sessions = SessionManager::in_memory(ManualClock::starting_now());
        let tracker = Tracker::new(config, sessions, transport, DoNotTrack::new(dnt));
        tracker.set_page_path("/pricing");
        (tracker, capture)
    }

    fn tracker() -> (Tracker, Arc<CaptureTransport>) {
        tracker_with(TrackerConfig::default(), false)
    }

    #[test]
    fn test_scroll_then_flush_sends_one_request() {
        let (tracker, capture) = tracker();
        tracker.track_scroll(50).unwrap();
        assert_eq!(tracker.flush_events(), 1);

        assert_eq!(capture.count(), 1);
        let payload = &capture.payloads()[0];
        let events = payload["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventCategory"], "scroll");
        assert_eq!(events[0]["eventAction"], "scroll_50");
        assert_eq!(events[0]["eventValue"], 50);
        assert_eq!(events[0]["pagePath"], "/pricing");
        assert_eq!(capture.deliveries()[0].0, DeliveryMode::Request);
    }

    #[test]
    fn test_flush_on_empty_queue_is_noop() {
        let (tracker, capture) = tracker();
        assert_eq!(tracker.flush_events(), 0);
        assert_eq!(tracker.flush_on_teardown(), 0);
        assert_eq!(capture.count(), 0);
    }

    #[test]
    fn test_fifty_events_auto_flush() {
        let (tracker, capture) = tracker();
        for i in 0..49 {
            tracker.track_scroll((i % 100) as u8).unwrap();
        }
        assert_eq!(tracker.queued_count(), 49);
        assert_eq!(capture.count(), 0);

        tracker.track_scroll(100).unwrap();
        assert_eq!(tracker.queued_count(), 0);
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.payloads()[0]["events"].as_array().unwrap().len(), 50);
    }

    #[test]
    fn test_batch_size_capped_at_server_limit() {
        let config = TrackerConfig {
            batch_size: 80,
            ..Default::default()
        };
        let (tracker, capture) = tracker_with(config, false);
        assert_eq!(tracker.batch_limit(), MAX_BATCH_SIZE);

        for _ in 0..60 {
            tracker.track_scroll(25).unwrap();
        }
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.payloads()[0]["events"].as_array().unwrap().len(), 50);
        assert_eq!(tracker.queued_count(), 10);

        tracker.flush_events();
        assert_eq!(capture.payloads()[1]["events"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_smaller_batch_size_honoured() {
        let config = TrackerConfig {
            batch_size: 5,
            ..Default::default()
        };
        let (tracker, capture) = tracker_with(config, false);
        for _ in 0..5 {
            tracker.track_scroll(25).unwrap();
        }
        assert_eq!(capture.count(), 1);
        assert_eq!(tracker.queued_count(), 0);
    }

    #[test]
    fn test_teardown_sends_everything_queued() {
        let (tracker, capture) = tracker();
        tracker.init_tracking();
        for percent in [25, 50, 75] {
            tracker.track_scroll(percent).unwrap();
        }

        assert_eq!(tracker.teardown_tracking(), 3);
        assert_eq!(tracker.queued_count(), 0);
        assert_eq!(capture.payloads()[0]["events"].as_array().unwrap().len(), 3);
        assert_eq!(capture.deliveries()[0].0, DeliveryMode::Request);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let (tracker, capture) = tracker();
        tracker.track_scroll(25).unwrap();
        tracker.track_click("cta", "hero").unwrap();
        tracker.track_engagement(6000).unwrap();
        tracker.flush_events();

        let payload = &capture.payloads()[0];
        let actions: Vec<&str> = payload["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["eventAction"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["scroll_25", "cta", "time_on_page"]);
    }

    #[test]
    fn test_do_not_track_is_silent() {
        let (tracker, capture) = tracker_with(TrackerConfig::default(), true);
        assert!(tracker.track_scroll(50).is_ok());
        assert_eq!(tracker.queued_count(), 0);
        assert!(!tracker.init_tracking());
        assert!(!tracker.is_initialized());
        tracker.flush_events();
        assert_eq!(capture.count(), 0);
    }

    #[test]
    fn test_malformed_event_rejected_before_queue() {
        let (tracker, _capture) = tracker();
        let err = tracker.track_click("cta", "reach me at ann@example.org").unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));
        assert_eq!(tracker.queued_count(), 0);
    }

    #[test]
    fn test_events_share_session_and_visitor_hash() {
        let config = TrackerConfig {
            visitor_hash: Some("v-hash".into()),
            ..Default::default()
        };
        let (tracker, capture) = tracker_with(config, false);
        tracker.track_scroll(25).unwrap();
        tracker.track_scroll(50).unwrap();
        tracker.flush_events();

        let payload = &capture.payloads()[0];
        let events = payload["events"].as_array().unwrap();
        assert_eq!(events[0]["sessionId"], events[1]["sessionId"]);
        assert_eq!(events[0]["visitorHash"], "v-hash");
    }

    #[test]
    fn test_init_runs_once_and_teardown_resets() {
        let (tracker, capture) = tracker();
        assert!(tracker.init_tracking());
        assert!(!tracker.init_tracking());
        assert!(tracker.is_initialized());

        tracker.track_conversion("signup", None).unwrap();
        assert_eq!(tracker.teardown_tracking(), 1);
        assert!(!tracker.is_initialized());
        assert_eq!(tracker.queued_count(), 0);
        assert_eq!(capture.count(), 1);

        assert!(tracker.init_tracking());
    }

    #[test]
    fn test_lifecycle_flush_uses_beacon_once_initialized() {
        let (tracker, capture) = tracker();
        tracker.track_scroll(75).unwrap();
        assert_eq!(tracker.handle_lifecycle(PageLifecycle::PageHide), 0);

        tracker.init_tracking();
        assert_eq!(tracker.handle_lifecycle(PageLifecycle::PageHide), 1);
        assert_eq!(tracker.handle_lifecycle(PageLifecycle::BeforeUnload), 0);
        assert_eq!(capture.deliveries()[0].0, DeliveryMode::Beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_flushes_pending_events() {
        let (tracker, capture) = tracker();
        tracker.init_tracking();
        tracker.track_scroll(25).unwrap();

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(capture.count(), 1);
        assert_eq!(tracker.queued_count(), 0);

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(capture.count(), 1);

        tracker.teardown_tracking();
        tracker.track_scroll(50).unwrap();
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(capture.count(), 1);
    }

    #[test]
    fn test_page_path_from_url() {
        assert_eq!(page_path_from_url("https://example.com/blog/post?x=1#top"), "/blog/post");
        assert_eq!(page_path_from_url("https://example.com"), "/");
        assert_eq!(page_path_from_url("/pricing?plan=pro"), "/pricing");
        assert_eq!(page_path_from_url(""), "/");
    }
}
