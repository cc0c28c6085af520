//! Processed-event registry backing at-most-once admission.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Records event ids that have already been admitted.
pub trait ProcessedEvents: Send + Sync {
    /// Record `event_id`. Returns `true` if it was already present.
    ///
    /// Check and insert happen as one step: of several concurrent callers
    /// with the same id, exactly one sees `false`.
    fn check_and_insert(&self, event_id: &str) -> bool;

    /// Number of ids currently remembered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct DedupeEntry {
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<String, DedupeEntry>,
    ttl: Duration,
    max_entries: usize,
}

/// TTL and size bounded idempotency cache.
///
/// Expired ids are dropped on every insert; when full, the oldest id is
/// evicted to make room.
pub struct DedupeCache {
    inner: Mutex<Inner>,
}

impl DedupeCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                ttl,
                max_entries: max_entries.max(1),
            }),
        }
    }

    fn check_and_insert_at(&self, key: &str, now: Instant) -> bool {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.evict_expired(now);
        if inner.entries.contains_key(key) {
            return true;
        }
        if inner.entries.len() >= inner.max_entries
            && let Some(oldest_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, v)| v.inserted_at)
                .map(|(k, _)| k.clone())
        {
            inner.entries.remove(&oldest_key);
        }
        inner.entries.insert(key.to_string(), DedupeEntry { inserted_at: now });
        false
    }
}

impl Inner {
    fn evict_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, v| now.saturating_duration_since(v.inserted_at) < ttl);
    }
}

impl ProcessedEvents for DedupeCache {
    fn check_and_insert(&self, event_id: &str) -> bool {
        self.check_and_insert_at(event_id, Instant::now())
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entries
            .len()
    }
}
