//! LRU set of query ids the bot has already answered.
//!
//! Saves an upstream lookup for queries seen again on another relay or after
//! a reconnect. The upstream lookup stays authoritative; the cache only
//! short-circuits it.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of query ids remembered.
const DEFAULT_ANSWERED_CAPACITY: usize = 10_000;

/// How often the cache spared the bot an upstream lookup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnsweredStats {
    /// Queries recognized as answered without asking upstream.
    pub lookups_saved: u64,
    /// Queries that had to be looked up upstream.
    pub lookups_needed: u64,
    /// Query ids recorded as answered.
    pub recorded: u64,
}

impl AnsweredStats {
    /// Share of checks answered from memory, as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn saved_ratio(&self) -> f64 {
        let checks = self.lookups_saved + self.lookups_needed;
        if checks == 0 {
            return 0.0;
        }
        self.lookups_saved as f64 * 100.0 / checks as f64
    }
}

struct Inner {
    ids: LruCache<String, ()>,
    stats: AnsweredStats,
}

/// Query ids known to carry a reply from this bot.
#[derive(Clone)]
pub struct AnsweredCache {
    inner: Arc<Mutex<Inner>>,
}

impl AnsweredCache {
    /// Remember up to the default number of ids.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ANSWERED_CAPACITY)
    }

    /// Remember at most `capacity` ids, evicting the least recently seen.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                ids: LruCache::new(capacity),
                stats: AnsweredStats::default(),
            })),
        }
    }

    /// Whether `query_id` is known to be answered.
    pub fn contains(&self, query_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let known = inner.ids.get(query_id).is_some();
        if known {
            inner.stats.lookups_saved += 1;
        } else {
            inner.stats.lookups_needed += 1;
        }
        known
    }

    /// Record `query_id` as answered.
    pub fn insert(&self, query_id: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.ids.put(query_id.into(), ());
        inner.stats.recorded += 1;
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> AnsweredStats {
        self.inner.lock().stats
    }

    /// Number of ids remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().ids.is_empty()
    }
}

impl Default for AnsweredCache {
    fn default() -> Self {
        Self::new()
    }
}
