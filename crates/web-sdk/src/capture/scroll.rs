//! Scroll-depth milestones. Raw scroll positions are turned into
//! `track_scroll` calls, each milestone reported at most once per page.

use parking_lot::Mutex;
use tracing::debug;

use crate::collector::Tracker;
use crate::events::DEFAULT_SCROLL_MILESTONES;

pub struct ScrollMilestones {
    tracker: Tracker,
    milestones: Vec<u8>,
    reached: Mutex<Vec<u8>>,
}

impl ScrollMilestones {
    pub fn new(tracker: Tracker) -> Self {
        Self::with_milestones(tracker, DEFAULT_SCROLL_MILESTONES.to_vec())
    }

    pub fn with_milestones(tracker: Tracker, mut milestones: Vec<u8>) -> Self {
        milestones.sort_unstable();
        milestones.dedup();
        Self {
            tracker,
            milestones,
            reached: Mutex::new(Vec::new()),
        }
    }

    /// Report every milestone at or below `depth_percent` not yet reported.
    /// Returns the milestones emitted by this call.
    pub fn observe(&self, depth_percent: f64) -> Vec<u8> {
        let mut reached = self.reached.lock();
        let mut emitted = Vec::new();

        for &milestone in &self.milestones {
            if f64::from(milestone) > depth_percent || reached.contains(&milestone) {
                continue;
            }
            reached.push(milestone);
            if let Err(e) = self.tracker.track_scroll(milestone) {
                debug!(error = %e, milestone = milestone, "scroll milestone not tracked");
                continue;
            }
            emitted.push(milestone);
        }
        emitted
    }

    /// Forget reached milestones, e.g. after a client-side navigation.
    pub fn reset(&self) {
        self.reached.lock().clear();
    }
}

/// Percentage of the document seen, from scroll offset and sizes in pixels.
pub fn depth_percent(scroll_top: f64, viewport_height: f64, document_height: f64) -> f64 {
    if document_height <= 0.0 {
        return 0.0;
    }
    let seen = (scroll_top + viewport_height).max(0.0);
    (seen / document_height * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DoNotTrack, TrackerConfig};
    use crate::session::SessionManager;
    use crate::transport::{CaptureTransport, Transport};
    use pulse_core::clock::ManualClock;
    use std::sync::Arc;

    fn tracker() -> (Tracker, Arc<CaptureTransport>) {
        let (transport, capture) = Transport::capture();
        let tracker = Tracker::new(
            TrackerConfig::default(),
            SessionManager::in_memory(ManualClock::starting_now()),
            transport,
            DoNotTrack::default(),
        );
        (tracker, capture)
    }

    #[test]
    fn test_each_milestone_once() {
        let (tracker, capture) = tracker();
        let scroll = ScrollMilestones::new(tracker.clone());

        assert_eq!(scroll.observe(30.0), vec![25]);
        assert_eq!(scroll.observe(80.0), vec![50, 75]);
        assert!(scroll.observe(60.0).is_empty());
        assert_eq!(scroll.observe(100.0), vec![100]);
        assert_eq!(tracker.queued_count(), 4);

        tracker.flush_events();
        let payload = &capture.payloads()[0];
        let values: Vec<i64> = payload["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["eventValue"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_reset_rearms_milestones() {
        let (tracker, _capture) = tracker();
        let scroll = ScrollMilestones::new(tracker);
        scroll.observe(100.0);
        scroll.reset();
        assert_eq!(scroll.observe(50.0), vec![25, 50]);
    }

    #[test]
    fn test_depth_percent() {
        assert_eq!(depth_percent(0.0, 500.0, 1000.0), 50.0);
        assert_eq!(depth_percent(900.0, 500.0, 1000.0), 100.0);
        assert_eq!(depth_percent(0.0, 500.0, 0.0), 0.0);
    }
}
