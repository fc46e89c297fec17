//! # ppe-relay
//!
//! A pay-per-event Nostr relay.
//!
//! Every stored record costs its author one satoshi. Authors pay by zapping
//! the relay operator; the relay finds those zap receipts on a set of
//! upstream relays and admits a new record only while the author's credit
//! exceeds the number of records already stored for them.
//!
//! ## Architecture
//!
//! - [`payment`]: receipt aggregation, invoice valuation and the admission gate
//! - [`bot`]: answers "balance" queries addressed to the operator
//! - [`relay`]: NIP-01 websocket server with pluggable admission policies
//! - [`upstream`]: NIP-01 client for the upstream relays
//! - [`store`]: local record storage (SQLite or in-memory)
//! - [`record`], [`protocol`]: the record shape and the wire messages
//!
//! ## Example
//!
//! ```rust,no_run
//! use ppe_relay::{RelayBuilder, RelayConfig, Secrets};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default();
//!     let secrets = Secrets::from_env()?;
//!     let mut relay = RelayBuilder::new(config, secrets).build().await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bot;
pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod payment;
pub mod protocol;
pub mod record;
pub mod relay;
pub mod store;
pub mod upstream;

pub use bot::{BotOutcome, Command, CommandBot};
pub use config::{RelayConfig, Secrets};
pub use error::{Error, Result};
pub use event::{RelayEvent, RelayEventsChannel};
pub use node::{RelayBuilder, RunningRelay};
pub use payment::{AdmissionDecision, AdmissionGate};
pub use record::{Filter, Keys, Record, UnsignedRecord};
pub use relay::{
    Base64MediaPolicy, EventPolicy, FilterPolicy, KindPolicy, NoComplexFilters, NoEmptyFilters,
    RelayServer,
};
