//! Local event store.
//!
//! The payment engine only ever reads from it ([`EventStore::count_by_author`]
//! is the usage counter); the hosting relay writes admitted records and serves
//! subscriptions from it.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::record::{Filter, Record};
use async_trait::async_trait;

/// Durable storage for admitted records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a record. Returns `false` if a record with the same id exists.
    async fn save(&self, record: &Record) -> Result<bool>;

    /// Stored records matching `filter`, newest first, honouring `limit`.
    async fn query(&self, filter: &Filter) -> Result<Vec<Record>>;

    /// Number of records stored for `author`.
    async fn count_by_author(&self, author: &str) -> Result<u64>;
}
