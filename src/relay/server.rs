//! NIP-01 websocket server.

use super::{EventPolicy, FilterPolicy};
use crate::error::{Error, Result};
use crate::event::{RelayEvent, RelayEventsSender};
use crate::payment::PayerLocks;
use crate::protocol::{ClientMessage, RelayMessage};
use crate::record::{Filter, Record};
use crate::store::EventStore;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Fan-out buffer for newly admitted records.
const LIVE_CAPACITY: usize = 1024;

/// Default cap on stored records returned per filter.
pub const DEFAULT_MAX_LIMIT: usize = 500;

/// Write path and read path of the hosting relay.
pub struct RelayServer {
    store: Arc<dyn EventStore>,
    policies: Vec<Arc<dyn EventPolicy>>,
    filter_policies: Vec<Arc<dyn FilterPolicy>>,
    max_limit: usize,
    payer_locks: Option<PayerLocks>,
    live: broadcast::Sender<Record>,
    events: RelayEventsSender,
}

impl RelayServer {
    /// Create a relay over `store` with no policies installed.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, events: RelayEventsSender) -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            store,
            policies: Vec::new(),
            filter_policies: Vec::new(),
            max_limit: DEFAULT_MAX_LIMIT,
            payer_locks: None,
            live,
            events,
        }
    }

    /// Append a policy; policies run in the order they were added.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn EventPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Append a `REQ` screening policy.
    #[must_use]
    pub fn with_filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policies.push(policy);
        self
    }

    /// Cap the stored records returned per filter. Filters without a
    /// `limit`, or with a larger one, get this cap.
    #[must_use]
    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Serialize admission per author, from policy check until save.
    #[must_use]
    pub fn with_payer_locks(mut self, locks: PayerLocks) -> Self {
        self.payer_locks = Some(locks);
        self
    }

    /// Process a submitted record and produce the `OK` acknowledgement.
    pub async fn handle_event(&self, record: Record) -> RelayMessage {
        if let Err(e) = record.verify() {
            debug!("Refusing {}: {e}", record.id);
            return RelayMessage::ok(record.id, false, format!("invalid: {e}"));
        }

        let _guard = match &self.payer_locks {
            Some(locks) => Some(locks.lock(&record.pubkey).await),
            None => None,
        };

        for policy in &self.policies {
            let decision = policy.check(&record).await;
            if let Some(reason) = decision.reason() {
                info!("Blocked {} by {} policy: {reason}", record.id, policy.name());
                let _ = self.events.send(RelayEvent::RecordRejected {
                    id: record.id.clone(),
                    reason: reason.to_string(),
                });
                return RelayMessage::ok(record.id, false, format!("blocked: {reason}"));
            }
        }

        match self.store.save(&record).await {
            Ok(true) => {
                info!("Stored {} (kind {}) from {}", record.id, record.kind, record.pubkey);
                let _ = self.events.send(RelayEvent::RecordAdmitted {
                    id: record.id.clone(),
                    author: record.pubkey.clone(),
                });
                let id = record.id.clone();
                // No receivers just means no live subscriptions.
                let _ = self.live.send(record);
                RelayMessage::ok(id, true, "")
            }
            Ok(false) => RelayMessage::ok(record.id, true, "duplicate: already have this event"),
            Err(e) => {
                error!("Failed to store {}: {e}", record.id);
                let _ = self.events.send(RelayEvent::Error {
                    message: format!("store failure: {e}"),
                });
                RelayMessage::ok(record.id, false, "error: could not save event")
            }
        }
    }

    /// First reason any filter policy gives for refusing `filters`.
    pub fn screen_filters(&self, filters: &[Filter]) -> Option<String> {
        for filter in filters {
            for policy in &self.filter_policies {
                if let Some(reason) = policy.check(filter).reason() {
                    debug!("Filter refused by {} policy: {reason}", policy.name());
                    return Some(reason.to_string());
                }
            }
        }
        None
    }

    /// Stored records for a subscription followed by `EOSE`.
    ///
    /// Each filter returns at most the configured maximum of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn handle_req(
        &self,
        subscription_id: &str,
        filters: &[Filter],
    ) -> Result<Vec<RelayMessage>> {
        let mut seen = HashSet::new();
        let mut replies = Vec::new();
        for filter in filters {
            let mut bounded = filter.clone();
            bounded.limit = Some(filter.limit.map_or(self.max_limit, |l| l.min(self.max_limit)));
            for record in self.store.query(&bounded).await? {
                if seen.insert(record.id.clone()) {
                    replies.push(RelayMessage::Event {
                        subscription_id: subscription_id.to_string(),
                        record: Box::new(record),
                    });
                }
            }
        }
        replies.push(RelayMessage::Eose(subscription_id.to_string()));
        Ok(replies)
    }

    /// Accept websocket clients on `listener` until shutdown is signalled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("Relay listening on ws://{addr}"),
            Err(e) => warn!("Relay listening on unknown address: {e}"),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, addr, shutdown).await {
                                debug!("Connection {addr} ended: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Relay stopped accepting connections");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let ws = accept_async(stream)
            .await
            .map_err(|e| Error::Network(format!("handshake with {addr} failed: {e}")))?;
        debug!("Client connected: {addr}");

        let (mut sink, mut source) = ws.split();
        let mut live = self.live.subscribe();
        let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();

        loop {
            tokio::select! {
                frame = source.next() => {
                    let Some(frame) = frame else { break };
                    let frame = frame.map_err(|e| Error::Network(format!("{addr}: {e}")))?;
                    match frame {
                        Message::Text(text) => {
                            for reply in self.dispatch(&text, &mut subscriptions).await {
                                sink.send(Message::Text(reply.to_json()))
                                    .await
                                    .map_err(|e| Error::Network(format!("{addr}: {e}")))?;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                record = live.recv() => match record {
                    Ok(record) => {
                        for (subscription_id, filters) in &subscriptions {
                            if filters.iter().any(|f| f.matches(&record)) {
                                let message = RelayMessage::Event {
                                    subscription_id: subscription_id.clone(),
                                    record: Box::new(record.clone()),
                                };
                                sink.send(Message::Text(message.to_json()))
                                    .await
                                    .map_err(|e| Error::Network(format!("{addr}: {e}")))?;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Client {addr} missed {missed} live records");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Err(Error::ShuttingDown);
                    }
                }
            }
        }

        debug!("Client disconnected: {addr}");
        Ok(())
    }

    async fn dispatch(
        &self,
        text: &str,
        subscriptions: &mut HashMap<String, Vec<Filter>>,
    ) -> Vec<RelayMessage> {
        match ClientMessage::from_json(text) {
            Ok(ClientMessage::Event(record)) => vec![self.handle_event(*record).await],
            Ok(ClientMessage::Req {
                subscription_id,
                filters,
            }) => {
                if let Some(reason) = self.screen_filters(&filters) {
                    subscriptions.remove(&subscription_id);
                    return vec![RelayMessage::Closed {
                        subscription_id,
                        message: format!("blocked: {reason}"),
                    }];
                }
                self.open_subscription(subscription_id, filters, subscriptions)
                    .await
            }
            Ok(ClientMessage::Close(subscription_id)) => {
                subscriptions.remove(&subscription_id);
                Vec::new()
            }
            Err(e) => vec![RelayMessage::Notice(format!("error: {e}"))],
        }
    }

    async fn open_subscription(
        &self,
        subscription_id: String,
        filters: Vec<Filter>,
        subscriptions: &mut HashMap<String, Vec<Filter>>,
    ) -> Vec<RelayMessage> {
        match self.handle_req(&subscription_id, &filters).await {
            Ok(replies) => {
                subscriptions.insert(subscription_id, filters);
                replies
            }
            Err(e) => {
                error!("Query for {subscription_id} failed: {e}");
                vec![RelayMessage::Closed {
                    subscription_id,
                    message: "error: could not query store".to_string(),
                }]
            }
        }
    }
}
