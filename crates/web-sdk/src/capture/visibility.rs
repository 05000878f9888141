//! Visible time-on-page accounting.
//!
//! Only time while the page is visible is counted. A heartbeat reports the
//! running total while the page stays open, and one final report is sent
//! when the page is torn down or the observed page changes.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::clock::Clock;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::collector::Tracker;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOnPageConfig {
    pub heartbeat_secs: u64,
    pub min_report_ms: i64,
}

impl Default for TimeOnPageConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            min_report_ms: 5_000,
        }
    }
}

struct VisibleTime {
    page: String,
    accumulated: Duration,
    visible_since: Option<DateTime<Utc>>,
    finalized: bool,
}

impl VisibleTime {
    fn fresh(page: String, visible: bool, now: DateTime<Utc>) -> Self {
        Self {
            page,
            accumulated: Duration::zero(),
            visible_since: visible.then_some(now),
            finalized: false,
        }
    }

    fn total(&self, now: DateTime<Utc>) -> Duration {
        match self.visible_since {
            Some(since) => self.accumulated + (now - since),
            None => self.accumulated,
        }
    }
}

pub struct TimeOnPage {
    tracker: Tracker,
    clock: Arc<dyn Clock>,
    config: TimeOnPageConfig,
    state: Mutex<VisibleTime>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl TimeOnPage {
    pub fn new(
        tracker: Tracker,
        clock: Arc<dyn Clock>,
        config: TimeOnPageConfig,
        page: impl Into<String>,
        visible: bool,
    ) -> Self {
        let now = clock.now();
        Self {
            tracker,
            clock,
            config,
            state: Mutex::new(VisibleTime::fresh(page.into(), visible, now)),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn page(&self) -> String {
        self.state.lock().page.clone()
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible_since.is_some()
    }

    /// Visible time accumulated so far on the current page.
    pub fn total_visible(&self) -> Duration {
        self.state.lock().total(self.clock.now())
    }

    pub fn on_visibility_change(&self, visible: bool) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match (visible, state.visible_since) {
            (false, Some(since)) => {
                state.accumulated = state.accumulated + (now - since);
                state.visible_since = None;
            }
            (true, None) => state.visible_since = Some(now),
            _ => {}
        }
    }

    /// Periodic report. Fires only while visible and past the minimum;
    /// returns the reported milliseconds.
    pub fn heartbeat(&self) -> Option<i64> {
        let millis = {
            let state = self.state.lock();
            if state.finalized || state.visible_since.is_none() {
                return None;
            }
            state.total(self.clock.now()).num_milliseconds()
        };
        if millis < self.config.min_report_ms {
            return None;
        }
        self.report(millis)
    }

    /// Final report for the current page, handed straight to the beacon
    /// path so it survives unload. Later calls are no-ops until the
    /// observed page changes.
    pub fn teardown(&self) -> Option<i64> {
        let reported = self.finalize();
        if reported.is_some() {
            self.tracker.flush_on_teardown();
        }
        reported
    }

    fn finalize(&self) -> Option<i64> {
        let now = self.clock.now();
        let millis = {
            let mut state = self.state.lock();
            if state.finalized {
                return None;
            }
            state.finalized = true;
            let total = state.total(now);
            state.accumulated = total;
            if state.visible_since.is_some() {
                state.visible_since = Some(now);
            }
            total.num_milliseconds()
        };
        if millis < self.config.min_report_ms {
            return None;
        }
        self.report(millis)
    }

    /// Switch to a new page: report the previous one, then reset. The report
    /// rides the next regular flush.
    pub fn set_page(&self, page: impl Into<String>) -> Option<i64> {
        let page = page.into();
        if self.state.lock().page == page {
            return None;
        }
        let reported = self.finalize();

        let now = self.clock.now();
        let mut state = self.state.lock();
        let visible = state.visible_since.is_some();
        *state = VisibleTime::fresh(page, visible, now);
        reported
    }

    /// Start the heartbeat timer on the ambient runtime.
    pub fn start(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            debug!("no async runtime available, time-on-page heartbeat disabled");
            return;
        };
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_some() {
            return;
        }
        let period = std::time::Duration::from_secs(self.config.heartbeat_secs.max(1));
        *heartbeat = Some(handle.spawn(run_heartbeat(Arc::downgrade(self), period)));
    }

    /// Stop the heartbeat and send the final report.
    pub fn stop(&self) -> Option<i64> {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        self.teardown()
    }

    fn report(&self, millis: i64) -> Option<i64> {
        match self.tracker.track_engagement(millis) {
            Ok(()) => Some(millis),
            Err(e) => {
                debug!(error = %e, millis = millis, "time on page not tracked");
                None
            }
        }
    }
}

async fn run_heartbeat(page: Weak<TimeOnPage>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(page) = page.upgrade() else {
            break;
        };
        page.heartbeat();
    }
}
