//! Per-session fixed-window rate limiter behind a pluggable store.
//!
//! Each key owns a window that starts on its first hit and closes
//! `window_secs` later. Hits past the limit are still counted, so a client
//! that keeps sending stays limited until the window rolls over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rate-limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// Counter state for one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Result returned by [`RateLimiter::check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub count: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

/// Storage for rate-limit windows. Implementations must be safe to share
/// across concurrent requests.
pub trait RateLimitStore: Send + Sync {
    /// Record one hit for `key` and return the entry after the update.
    /// Starts a fresh window when none exists or the current one expired.
    fn hit(&self, key: &str, now: DateTime<Utc>, window: Duration) -> RateLimitEntry;

    /// Current entry for `key`, if any.
    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    /// Drop every expired entry, returning how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by DashMap.
#[derive(Default)]
pub struct DashMapRateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl DashMapRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for DashMapRateLimitStore {
    fn hit(&self, key: &str, now: DateTime<Utc>, window: Duration) -> RateLimitEntry {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_at: now + window,
            });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count = entry.count.saturating_add(1);
        entry.clone()
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Rate limiter keyed on application-level session identity.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter backed by an in-process [`DashMapRateLimitStore`].
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(Arc::new(DashMapRateLimitStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check (and consume) one hit for `key` at the current time.
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitResult {
        let window = Duration::seconds(self.config.window_secs as i64);
        let entry = self.store.hit(key, now, window);
        let allowed = entry.count <= self.config.max_requests;

        if !allowed {
            debug!(key = key, count = entry.count, reset_at = %entry.reset_at, "rate limit exceeded");
        }

        RateLimitResult {
            allowed,
            count: entry.count,
            remaining: self.config.max_requests.saturating_sub(entry.count),
            reset_at: entry.reset_at,
            limit: self.config.max_requests,
        }
    }

    /// Remove expired windows.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep_expired(now)
    }

    /// Read current usage for a key (if any).
    pub fn get_usage(&self, key: &str) -> Option<RateLimitEntry> {
        self.store.get(key)
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs: 60,
        })
    }

    #[test]
    fn test_hundredth_allowed_hundred_first_denied() {
        let limiter = limiter(100);
        let now = Utc::now();

        for i in 1..=100 {
            let result = limiter.check_at("session-a", now);
            assert!(result.allowed, "batch {i} should be allowed");
        }

        let result = limiter.check_at("session-a", now + Duration::seconds(30));
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.count, 101);
    }

    #[test]
    fn test_denied_hits_still_count() {
        let limiter = limiter(2);
        let now = Utc::now();
        limiter.check_at("s", now);
        limiter.check_at("s", now);
        assert!(!limiter.check_at("s", now).allowed);
        assert!(!limiter.check_at("s", now).allowed);
        assert_eq!(limiter.get_usage("s").unwrap().count, 4);
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = limiter(1);
        let start = Utc::now();
        assert!(limiter.check_at("s", start).allowed);
        assert!(!limiter.check_at("s", start + Duration::seconds(59)).allowed);

        let result = limiter.check_at("s", start + Duration::seconds(61));
        assert!(result.allowed);
        assert_eq!(result.count, 1);
        assert_eq!(result.reset_at, start + Duration::seconds(121));
    }

    #[test]
    fn test_sessions_have_independent_budgets() {
        let limiter = limiter(1);
        let now = Utc::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn test_sweep_drops_only_expired_entries() {
        let limiter = limiter(10);
        let start = Utc::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::seconds(50));
        assert_eq!(limiter.tracked_keys(), 2);

        let removed = limiter.sweep(start + Duration::seconds(70));
        assert_eq!(removed, 1);
        assert!(limiter.get_usage("old").is_none());
        assert!(limiter.get_usage("fresh").is_some());
    }
}
