//! Relay event system.

use tokio::sync::broadcast;

/// Events emitted by the relay.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Relay has started and is accepting connections.
    Started {
        /// Address the websocket listener is bound to.
        address: String,
    },

    /// Relay is shutting down.
    ShuttingDown,

    /// A record passed every policy and was stored.
    RecordAdmitted {
        /// Record id.
        id: String,
        /// Record author.
        author: String,
    },

    /// A record was refused.
    RecordRejected {
        /// Record id.
        id: String,
        /// Reason sent to the submitter.
        reason: String,
    },

    /// The command bot answered a query.
    ReplyPublished {
        /// Id of the query being answered.
        query_id: String,
        /// Id of the reply record.
        reply_id: String,
        /// Number of upstream relays that accepted the reply.
        delivered_to: usize,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving relay events.
pub type RelayEventsChannel = broadcast::Receiver<RelayEvent>;

/// Sender for relay events.
pub type RelayEventsSender = broadcast::Sender<RelayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (RelayEventsSender, RelayEventsChannel) {
    broadcast::channel(256)
}
