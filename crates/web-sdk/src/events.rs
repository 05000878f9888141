//! Page signals forwarded by the host and the action names the collector
//! emits for them.

use serde::{Deserialize, Serialize};

/// Action recorded by the time-on-page accumulator.
pub const TIME_ON_PAGE_ACTION: &str = "time_on_page";

/// Click category used when a marker carries no `category:` prefix.
pub const DEFAULT_CLICK_CATEGORY: &str = "cta";

/// Scroll milestones reported by default.
pub const DEFAULT_SCROLL_MILESTONES: [u8; 4] = [25, 50, 75, 100];

/// Page lifecycle transitions that force a teardown flush.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageLifecycle {
    /// The page became hidden (tab switch, minimise, app switch).
    Hidden,
    /// The page is being hidden for navigation or bfcache.
    PageHide,
    /// The page is about to unload.
    BeforeUnload,
}

pub fn scroll_action(percent: u8) -> String {
    format!("scroll_{percent}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_action_name() {
        assert_eq!(scroll_action(50), "scroll_50");
        assert_eq!(scroll_action(100), "scroll_100");
    }

    #[test]
    fn test_lifecycle_wire_names() {
        let json = serde_json::to_string(&PageLifecycle::BeforeUnload).unwrap();
        assert_eq!(json, "\"before_unload\"");
    }
}
