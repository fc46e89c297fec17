//! Per-payer serialization of admission.
//!
//! The gate itself is stateless, so two records from one author checked at
//! the same time both see the same usage. Holding a payer's lock from the
//! check until the record is saved closes that window on a single host.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Default number of payers with a live lock entry.
const DEFAULT_LOCK_CAPACITY: usize = 10_000;

/// Table of per-payer async mutexes.
///
/// Entries are LRU-evicted. An entry evicted while held stays valid for its
/// holder; only a newcomer for the same payer could then race it, which
/// requires more than `capacity` distinct payers in flight at once.
#[derive(Clone)]
pub struct PayerLocks {
    inner: Arc<Mutex<LruCache<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PayerLocks {
    /// Create a table with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOCK_CAPACITY)
    }

    /// Create a table holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    /// Wait for exclusive admission rights for `payer`.
    ///
    /// Payers are compared exactly; records reach here only after their
    /// pubkey has been checked to be lowercase hex.
    pub async fn lock(&self, payer: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.inner.lock();
            table
                .get_or_insert(payer.to_string(), || {
                    Arc::new(tokio::sync::Mutex::new(()))
                })
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Number of payers with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if no payer has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for PayerLocks {
    fn default() -> Self {
        Self::new()
    }
}
