//! The hosting relay: a NIP-01 websocket server whose write path runs every
//! submitted record through a list of [`EventPolicy`] hooks before storing it,
//! and whose read path screens every `REQ` with [`FilterPolicy`] hooks.

mod server;

pub use server::{RelayServer, DEFAULT_MAX_LIMIT};

use crate::payment::AdmissionDecision;
use crate::record::{Filter, Record};
use async_trait::async_trait;

/// Filters with more tag constraints than this may not add further kinds.
const COMPLEX_FILTER_TAGS: usize = 2;
/// Combined tag and kind constraints allowed alongside many tags.
const COMPLEX_FILTER_ITEMS: usize = 4;

/// A pre-store admission hook.
///
/// Policies run in order; the first rejection wins.
#[async_trait]
pub trait EventPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide whether `record` may be stored.
    async fn check(&self, record: &Record) -> AdmissionDecision;
}

/// Rejects records whose kind is not on an allow list.
#[derive(Debug, Clone)]
pub struct KindPolicy {
    allowed: Vec<u16>,
}

impl KindPolicy {
    /// Allow only `allowed` kinds. An empty list allows every kind.
    #[must_use]
    pub fn new(allowed: Vec<u16>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl EventPolicy for KindPolicy {
    fn name(&self) -> &'static str {
        "kind"
    }

    async fn check(&self, record: &Record) -> AdmissionDecision {
        if self.allowed.is_empty() || self.allowed.contains(&record.kind) {
            AdmissionDecision::Accept
        } else {
            AdmissionDecision::reject(format!("received event kind {} not allowed", record.kind))
        }
    }
}

/// Rejects records carrying inline base64 images or video.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64MediaPolicy;

#[async_trait]
impl EventPolicy for Base64MediaPolicy {
    fn name(&self) -> &'static str {
        "base64-media"
    }

    async fn check(&self, record: &Record) -> AdmissionDecision {
        if record.content.contains("data:image/") || record.content.contains("data:video/") {
            AdmissionDecision::reject("event with base64 media")
        } else {
            AdmissionDecision::Accept
        }
    }
}

/// A `REQ` screening hook. Every filter of a subscription must pass.
pub trait FilterPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide whether `filter` may be served.
    fn check(&self, filter: &Filter) -> AdmissionDecision;
}

/// Rejects filters with no id, author, kind or tag value to narrow on.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmptyFilters;

impl FilterPolicy for NoEmptyFilters {
    fn name(&self) -> &'static str {
        "no-empty-filters"
    }

    fn check(&self, filter: &Filter) -> AdmissionDecision {
        let constraints = filter.ids.as_ref().map_or(0, Vec::len)
            + filter.authors.as_ref().map_or(0, Vec::len)
            + filter.kinds.as_ref().map_or(0, Vec::len)
            + filter.tags.values().map(Vec::len).sum::<usize>();
        if constraints == 0 {
            AdmissionDecision::reject("can't handle empty filters")
        } else {
            AdmissionDecision::Accept
        }
    }
}

/// Rejects filters combining many tag names with further kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoComplexFilters;

impl FilterPolicy for NoComplexFilters {
    fn name(&self) -> &'static str {
        "no-complex-filters"
    }

    fn check(&self, filter: &Filter) -> AdmissionDecision {
        let tags = filter.tags.len();
        let items = tags + filter.kinds.as_ref().map_or(0, Vec::len);
        if items > COMPLEX_FILTER_ITEMS && tags > COMPLEX_FILTER_TAGS {
            AdmissionDecision::reject("too many things to filter for")
        } else {
            AdmissionDecision::Accept
        }
    }
}
