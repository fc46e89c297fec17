//! NIP-01 wire messages.
//!
//! Both directions are needed: the hosting relay parses [`ClientMessage`] and
//! emits [`RelayMessage`], while the upstream client does the reverse.

use crate::error::{Error, Result};
use crate::record::{Filter, Record};
use serde_json::{json, Value};

/// Messages sent from a client to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["EVENT", record]`: publish a record.
    Event(Box<Record>),
    /// `["REQ", sub_id, filter...]`: open a subscription.
    Req {
        /// Subscription id chosen by the client.
        subscription_id: String,
        /// Filters, OR-ed together.
        filters: Vec<Filter>,
    },
    /// `["CLOSE", sub_id]`: end a subscription.
    Close(String),
}

/// Messages sent from a relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", sub_id, record]`.
    Event {
        /// Subscription the record matched.
        subscription_id: String,
        /// The record.
        record: Box<Record>,
    },
    /// `["OK", id, accepted, message]`.
    Ok {
        /// Record id being acknowledged.
        id: String,
        /// Whether the record was accepted.
        accepted: bool,
        /// Machine-prefixed human-readable message.
        message: String,
    },
    /// `["EOSE", sub_id]`: end of stored records.
    Eose(String),
    /// `["CLOSED", sub_id, message]`: subscription refused or ended by relay.
    Closed {
        /// Subscription id.
        subscription_id: String,
        /// Reason.
        message: String,
    },
    /// `["NOTICE", message]`.
    Notice(String),
}

impl ClientMessage {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a record or filter cannot be serialized.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(record) => json!(["EVENT", record]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(value.to_string())
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown or malformed frames.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut frame = parse_frame(text)?;
        let label = label(&frame)?.to_string();
        match label.as_str() {
            "EVENT" => Ok(Self::Event(Box::new(take_record(&mut frame, 1)?))),
            "REQ" => {
                let subscription_id = take_string(&frame, 1)?;
                let filters = frame
                    .drain(2..)
                    .map(serde_json::from_value)
                    .collect::<std::result::Result<Vec<Filter>, _>>()
                    .map_err(|e| Error::Protocol(format!("bad filter: {e}")))?;
                if filters.is_empty() {
                    return Err(Error::Protocol("REQ without filters".to_string()));
                }
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close(take_string(&frame, 1)?)),
            other => Err(Error::Protocol(format!("unknown message type {other}"))),
        }
    }
}

impl RelayMessage {
    /// Build an `OK` acknowledgement.
    #[must_use]
    pub fn ok(id: impl Into<String>, accepted: bool, message: impl Into<String>) -> Self {
        Self::Ok {
            id: id.into(),
            accepted,
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Event {
                subscription_id,
                record,
            } => json!(["EVENT", subscription_id, record]),
            Self::Ok {
                id,
                accepted,
                message,
            } => json!(["OK", id, accepted, message]),
            Self::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            Self::Notice(message) => json!(["NOTICE", message]),
        };
        value.to_string()
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown or malformed frames.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut frame = parse_frame(text)?;
        let label = label(&frame)?.to_string();
        match label.as_str() {
            "EVENT" => Ok(Self::Event {
                subscription_id: take_string(&frame, 1)?,
                record: Box::new(take_record(&mut frame, 2)?),
            }),
            "OK" => Ok(Self::Ok {
                id: take_string(&frame, 1)?,
                accepted: frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::Protocol("OK without status".to_string()))?,
                message: take_string(&frame, 3).unwrap_or_default(),
            }),
            "EOSE" => Ok(Self::Eose(take_string(&frame, 1)?)),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: take_string(&frame, 1)?,
                message: take_string(&frame, 2).unwrap_or_default(),
            }),
            "NOTICE" => Ok(Self::Notice(take_string(&frame, 1)?)),
            other => Err(Error::Protocol(format!("unknown message type {other}"))),
        }
    }
}

fn parse_frame(text: &str) -> Result<Vec<Value>> {
    serde_json::from_str(text).map_err(|e| Error::Protocol(format!("frame is not a JSON array: {e}")))
}

fn label(frame: &[Value]) -> Result<&str> {
    frame
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("frame has no type label".to_string()))
}

fn take_string(frame: &[Value], index: usize) -> Result<String> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("expected string at position {index}")))
}

fn take_record(frame: &mut [Value], index: usize) -> Result<Record> {
    let value = frame
        .get_mut(index)
        .map(Value::take)
        .ok_or_else(|| Error::Protocol(format!("expected record at position {index}")))?;
    serde_json::from_value(value).map_err(|e| Error::Protocol(format!("bad record: {e}")))
}
