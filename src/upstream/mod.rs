//! Upstream relays: the endpoints payment receipts are read from and bot
//! replies are broadcast to.
//!
//! [`Upstream`] is the seam the payment engine and the command bot depend on;
//! [`WsUpstream`] implements it over NIP-01 websockets.

mod ws;

pub use ws::{ReconnectPolicy, WsUpstream};

use crate::record::{Filter, Record};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Read and write access to a fixed set of upstream endpoints.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// The configured endpoint URLs.
    fn endpoints(&self) -> &[String];

    /// Collect stored records matching `filter` from every endpoint.
    ///
    /// Returns once every endpoint has signalled end-of-stored-records or
    /// `timeout` has elapsed, whichever comes first; in the latter case the
    /// records gathered so far are returned. Unreachable endpoints contribute
    /// nothing. The same record may appear once per endpoint.
    async fn fetch(&self, filter: &Filter, timeout: Duration) -> Vec<Record>;

    /// Return the first stored record matching `filter` on any endpoint.
    async fn first_match(&self, filter: &Filter, timeout: Duration) -> Option<Record>;

    /// Open a long-lived subscription on every endpoint.
    async fn subscribe(&self, filter: &Filter) -> Subscription;

    /// Send `record` to every endpoint independently.
    async fn publish(&self, record: &Record) -> PublishReport;
}

/// A live, multiplexed subscription. Dropping it closes every endpoint task.
pub struct Subscription {
    rx: mpsc::Receiver<Record>,
    _tasks: JoinSet<()>,
}

impl Subscription {
    /// Wrap a channel fed by per-endpoint tasks.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Record>, tasks: JoinSet<()>) -> Self {
        Self { rx, _tasks: tasks }
    }

    /// Next record, or `None` once every endpoint has closed.
    pub async fn next(&mut self) -> Option<Record> {
        self.rx.recv().await
    }
}

/// Per-endpoint outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Endpoints that acknowledged the record.
    pub accepted: Vec<String>,
    /// Endpoints that refused or failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    /// Whether at least one endpoint took the record.
    #[must_use]
    pub fn delivered(&self) -> bool {
        !self.accepted.is_empty()
    }
}
