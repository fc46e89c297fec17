//! Pay-per-event admission for ppe-relay.
//!
//! Every stored record costs one satoshi. Credit is whatever the author has
//! paid the operator in zaps, as reported by the upstream relays; usage is
//! how many of the author's records the local store already holds.
//!
//! # Architecture
//!
//! ```text
//! EVENT received
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Lock payer (opt.)   │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────────────┐
//!    │                     │
//!    ▼                     ▼
//! Fetch receipts       Count stored
//! (upstream, #p=op)    (local store)
//!    │                     │
//!    ▼                     │
//! Extract payer,           │
//! value bolt11             │
//!    │                     │
//!    └──────┬──────────────┘
//!           │
//!    credit >= used + 1 ?
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!   YES            NO
//!    │             │
//!    ▼             ▼
//!  Accept     Reject "no sufficient balance; top up"
//! ```

mod aggregator;
mod balance;
mod invoice;
mod locks;
mod verifier;
mod zap;

pub use aggregator::{select_receipts, AggregatorConfig, PaymentAggregator};
pub use balance::{sum_credit, BalanceCalculator};
pub use invoice::{
    msats_to_sats, Bolt11Valuator, InvoiceError, InvoiceValuator, BOLT11_TAG, MSATS_PER_SAT,
};
pub use locks::PayerLocks;
pub use verifier::{decide, AdmissionDecision, AdmissionGate, CANNOT_VERIFY, INSUFFICIENT_BALANCE};
pub use zap::{extract_zap_request, ZapError, ZapRequest, DESCRIPTION_TAG};
