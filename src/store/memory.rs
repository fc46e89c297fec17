//! In-memory event store for ephemeral relays and tests.

use super::EventStore;
use crate::error::Result;
use crate::record::{Filter, Record};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Event store that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Record>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save(&self, record: &Record) -> Result<bool> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Record>> {
        let mut matched: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count_by_author(&self, author: &str) -> Result<u64> {
        let count = self
            .records
            .read()
            .values()
            .filter(|r| r.pubkey == author)
            .count();
        Ok(count as u64)
    }
}
