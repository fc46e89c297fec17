//! Command bot answering balance queries over the upstream relays.
//!
//! A query is a text note that tags the operator and mentions "balance" as a
//! whole word. Each query is answered at most once: before replying, the bot
//! checks the upstream relays for an existing reply of its own to that query.
//!
//! ```text
//! subscription {kinds:[1], #p:[operator]}
//!        │
//!        ▼
//!   own record? ──yes──► ignore
//!        │ no
//!        ▼
//!   "balance"?  ──no───► ignore
//!        │ yes
//!        ▼
//!   answered?   ──yes──► skip   (cache, then {kinds:[1], #e:[id], authors:[bot]})
//!        │ no
//!        ▼
//!   credit - used ──► sign reply ──► publish to every relay
//! ```

mod answered;
mod command;

pub use answered::{AnsweredCache, AnsweredStats};
pub use command::{balance_reply, Command};

use crate::error::{Error, Result};
use crate::event::{RelayEvent, RelayEventsSender};
use crate::payment::AdmissionGate;
use crate::record::{Filter, Keys, Record, UnsignedRecord, KIND_TEXT_NOTE};
use crate::upstream::Upstream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the bot did with one observed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotOutcome {
    /// Not a query for this bot.
    Ignored,
    /// A reply already exists.
    AlreadyAnswered,
    /// A reply was accepted by at least one relay.
    Replied(Box<Record>),
    /// A reply was signed but no relay accepted it.
    Undelivered(Box<Record>),
}

/// Answers balance queries addressed to the operator.
pub struct CommandBot {
    gate: Arc<AdmissionGate>,
    upstream: Arc<dyn Upstream>,
    keys: Keys,
    answered: AnsweredCache,
    lookup_timeout: Duration,
    events: RelayEventsSender,
}

impl CommandBot {
    /// Create a bot replying as `keys`, computing balances through `gate`.
    #[must_use]
    pub fn new(
        gate: Arc<AdmissionGate>,
        upstream: Arc<dyn Upstream>,
        keys: Keys,
        events: RelayEventsSender,
    ) -> Self {
        Self {
            gate,
            upstream,
            keys,
            answered: AnsweredCache::new(),
            lookup_timeout: Duration::from_secs(5),
            events,
        }
    }

    /// Deadline for the "already answered" lookup.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Replace the answered-id cache.
    #[must_use]
    pub fn with_answered_cache(mut self, cache: AnsweredCache) -> Self {
        self.answered = cache;
        self
    }

    /// The bot's public key.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// The answered-id cache.
    #[must_use]
    pub fn answered(&self) -> &AnsweredCache {
        &self.answered
    }

    /// Filter for incoming queries.
    #[must_use]
    pub fn query_filter(&self) -> Filter {
        Filter::new()
            .kinds([KIND_TEXT_NOTE])
            .tag('p', [self.gate.operator().to_string()])
    }

    /// Filter for the bot's own replies to `query_id`.
    #[must_use]
    pub fn reply_filter(&self, query_id: &str) -> Filter {
        Filter::new()
            .kinds([KIND_TEXT_NOTE])
            .tag('e', [query_id.to_string()])
            .authors([self.keys.public_key().to_string()])
    }

    /// Whether any upstream relay holds a reply to `query_id`.
    pub async fn is_answered(&self, query_id: &str) -> bool {
        if self.answered.contains(query_id) {
            return true;
        }
        let found = self
            .upstream
            .first_match(&self.reply_filter(query_id), self.lookup_timeout)
            .await
            .is_some();
        if found {
            self.answered.insert(query_id);
        }
        found
    }

    /// Build and sign the reply to `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be signed.
    pub fn build_reply(&self, query: &Record, remaining: i64) -> Result<Record> {
        UnsignedRecord::new(KIND_TEXT_NOTE, balance_reply(remaining))
            .tag(["e", query.id.as_str()])
            .tag(["p", query.pubkey.as_str()])
            .sign(&self.keys)
    }

    /// Process one observed record.
    ///
    /// The command is parsed before the answered lookup, so ordinary
    /// mentions never cost an upstream round trip. Either order yields the
    /// same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payment`] if the author's balance cannot be computed.
    pub async fn handle(&self, query: &Record) -> Result<BotOutcome> {
        if query.kind != KIND_TEXT_NOTE || query.pubkey == self.keys.public_key() {
            return Ok(BotOutcome::Ignored);
        }
        let Some(Command::Balance) = Command::parse(&query.content) else {
            return Ok(BotOutcome::Ignored);
        };
        if self.is_answered(&query.id).await {
            debug!("Query {} already answered", query.id);
            return Ok(BotOutcome::AlreadyAnswered);
        }

        let remaining = self
            .gate
            .remaining_balance(&query.pubkey)
            .await
            .map_err(|e| Error::Payment(format!("balance of {}: {e}", query.pubkey)))?;
        let reply = self.build_reply(query, remaining)?;

        let report = self.upstream.publish(&reply).await;
        for (url, reason) in &report.failed {
            warn!("Reply {} not published to {url}: {reason}", reply.id);
        }
        if !report.delivered() {
            warn!("Reply to {} reached no relay", query.id);
            return Ok(BotOutcome::Undelivered(Box::new(reply)));
        }

        info!(
            "Answered {} from {} ({remaining} sats) on {} relays",
            query.id,
            query.pubkey,
            report.accepted.len()
        );
        self.answered.insert(query.id.clone());
        let _ = self.events.send(RelayEvent::ReplyPublished {
            query_id: query.id.clone(),
            reply_id: reply.id.clone(),
            delivered_to: report.accepted.len(),
        });
        Ok(BotOutcome::Replied(Box::new(reply)))
    }

    /// Consume the query subscription until shutdown.
    ///
    /// Upstream relays that drop the connection are redialed with backoff,
    /// so the subscription only ends early when no relay is configured.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let filter = self.query_filter();
        let mut subscription = self.upstream.subscribe(&filter).await;
        info!("Command bot listening as {}", self.keys.public_key());

        loop {
            tokio::select! {
                next = subscription.next() => {
                    let Some(query) = next else {
                        info!("No upstream query subscriptions left; command bot stopping");
                        break;
                    };
                    if let Err(e) = self.handle(&query).await {
                        warn!("Failed to answer {}: {e}", query.id);
                        let _ = self.events.send(RelayEvent::Error {
                            message: format!("command bot: {e}"),
                        });
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let stats = self.answered.stats();
        info!(
            "Command bot stopped: {} replies recorded, {:.1}% of answered checks served from memory",
            stats.recorded,
            stats.saved_ratio()
        );
    }
}
