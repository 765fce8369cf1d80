//! Time-bounded record of bus envelopes already delivered locally.
//!
//! The bus may redeliver an envelope. An id is remembered for `window`;
//! envelopes older than `window` are refused outright, so a redelivered
//! copy can never outlive the entry that would catch it.

use std::collections::HashMap;
use std::time::Duration;

use medirelay_common::now_millis;

/// Outcome of checking an envelope against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Not seen before and inside the window
    Fresh,
    /// Already delivered on this node
    Duplicate,
    /// Sent longer ago than the window
    Stale,
}

pub struct SeenEnvelopes {
    /// envelope id -> sent_at (epoch millis)
    seen: HashMap<String, i64>,
    window_ms: i64,
    last_gc: i64,
}

impl SeenEnvelopes {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            last_gc: now_millis(),
        }
    }

    /// Classify an envelope without recording it
    pub fn check(&mut self, id: &str, sent_at: i64) -> Freshness {
        let now = now_millis();
        if now.saturating_sub(self.last_gc) > self.window_ms / 4 {
            self.garbage_collect(now);
        }

        if sent_at < now.saturating_sub(self.window_ms) {
            Freshness::Stale
        } else if self.seen.contains_key(id) {
            Freshness::Duplicate
        } else {
            Freshness::Fresh
        }
    }

    /// Remember a delivered envelope
    pub fn record(&mut self, id: &str, sent_at: i64) {
        self.seen.insert(id.to_string(), sent_at);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    fn garbage_collect(&mut self, now: i64) {
        let threshold = now.saturating_sub(self.window_ms);
        let before = self.seen.len();
        self.seen.retain(|_, sent_at| *sent_at >= threshold);
        self.last_gc = now;

        let removed = before - self.seen.len();
        if removed > 0 {
            tracing::trace!(removed, remaining = self.seen.len(), "Expired delivered envelope ids");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_then_duplicate() {
        let mut cache = SeenEnvelopes::new(Duration::from_secs(120));
        let now = now_millis();

        assert_eq!(cache.check("e1", now), Freshness::Fresh);
        cache.record("e1", now);
        assert_eq!(cache.check("e1", now), Freshness::Duplicate);
        assert_eq!(cache.check("e2", now), Freshness::Fresh);
    }

    #[test]
    fn test_old_envelopes_are_stale() {
        let mut cache = SeenEnvelopes::new(Duration::from_secs(120));
        let old = now_millis() - 121_000;
        assert_eq!(cache.check("e1", old), Freshness::Stale);
    }

    #[test]
    fn test_garbage_collection_drops_expired_ids() {
        let mut cache = SeenEnvelopes::new(Duration::from_secs(1));
        cache.record("old", now_millis() - 5_000);
        cache.record("new", now_millis());

        cache.garbage_collect(now_millis());
        assert_eq!(cache.len(), 1);
    }
}
