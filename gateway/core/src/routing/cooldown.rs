//! Cooldown Tracker
//!
//! Per-backend boolean-with-expiry gate. A backend whose cascade exhausted on
//! rate limits is marked cooling down for a fixed TTL; routing skips it until
//! the entry expires. Expired entries are cleared lazily on read.
//!
//! Uses `tokio::time::Instant` so paused-clock tests can advance time.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

/// Default cooldown period
pub const DEFAULT_COOLDOWN_TTL: Duration = Duration::from_secs(30);

/// Tracks which backends are cooling down
#[derive(Debug)]
pub struct CooldownTracker {
    ttl: Duration,
    entries: DashMap<String, Instant>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_TTL)
    }
}

impl CooldownTracker {
    /// Create a tracker with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Cooldown period
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark a backend cooling down until `now + ttl` (last write wins)
    pub fn mark_limited(&self, name: &str) {
        let until = Instant::now() + self.ttl;
        self.entries.insert(name.to_string(), until);
        debug!(backend = name, ttl_secs = self.ttl.as_secs(), "cooldown set");
    }

    /// Whether the backend may be used; clears an expired entry
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.remaining(name).is_none()
    }

    /// Time left on the backend's cooldown, if any
    #[must_use]
    pub fn remaining(&self, name: &str) -> Option<Duration> {
        let now = Instant::now();
        let until = self.entries.get(name).map(|entry| *entry.value())?;

        if until > now {
            return Some(until - now);
        }

        // Only remove if no newer mark landed since the read
        self.entries.remove_if(name, |_, expiry| *expiry <= now);
        None
    }

    /// Remove a backend's cooldown
    pub fn clear(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Names currently cooling down, sorted
    #[must_use]
    pub fn cooling_down(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires_after_ttl() {
        let tracker = CooldownTracker::new(Duration::from_secs(30));
        assert!(tracker.is_available("groq"));

        tracker.mark_limited("groq");
        assert!(!tracker.is_available("groq"));
        assert!(tracker.is_available("deepseek"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!tracker.is_available("groq"));
        assert_eq!(tracker.remaining("groq"), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(tracker.is_available("groq"));
        assert!(tracker.cooling_down().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remark_extends_cooldown() {
        let tracker = CooldownTracker::new(Duration::from_secs(10));
        tracker.mark_limited("groq");

        tokio::time::advance(Duration::from_secs(8)).await;
        tracker.mark_limited("groq");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!tracker.is_available("groq"));
        assert_eq!(tracker.cooling_down(), vec!["groq".to_string()]);
    }

    #[tokio::test]
    async fn test_clear() {
        let tracker = CooldownTracker::default();
        tracker.mark_limited("claude");
        tracker.clear("claude");
        assert!(tracker.is_available("claude"));
        assert_eq!(tracker.ttl(), DEFAULT_COOLDOWN_TTL);
    }

    #[tokio::test]
    async fn test_concurrent_marks() {
        let tracker = std::sync::Arc::new(CooldownTracker::default());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker.mark_limited(if i % 2 == 0 { "a" } else { "b" });
                    tracker.is_available("a")
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.cooling_down(), vec!["a".to_string(), "b".to_string()]);
    }
}
