//! Admission gate combining payment credit and stored usage.
//!
//! This is the core pay-per-event rule: every stored record costs one
//! satoshi, so a record is admitted only if the author's credit covers every
//! record already stored for them plus this one.

use crate::error::{Error, Result};
use crate::payment::aggregator::{AggregatorConfig, PaymentAggregator};
use crate::payment::balance::BalanceCalculator;
use crate::payment::invoice::InvoiceValuator;
use crate::record::Record;
use crate::relay::EventPolicy;
use crate::store::EventStore;
use crate::upstream::Upstream;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Rejection reason when credit does not cover the record.
pub const INSUFFICIENT_BALANCE: &str = "no sufficient balance; top up";

/// Rejection reason when usage cannot be read.
pub const CANNOT_VERIFY: &str = "error: could not verify balance";

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The record may be stored (subject to other policies).
    Accept,
    /// The record must not be stored.
    Reject {
        /// Reason shown to the submitter.
        reason: String,
    },
}

impl AdmissionDecision {
    /// Build a rejection.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    /// Returns true if the record may be stored.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Accept => None,
            Self::Reject { reason } => Some(reason),
        }
    }
}

/// The admission rule: accept iff `credit >= used + 1`.
#[must_use]
pub fn decide(credit: u64, used: u64) -> AdmissionDecision {
    // credit >= used + 1, without the addition overflowing at u64::MAX.
    if credit > used {
        AdmissionDecision::Accept
    } else {
        AdmissionDecision::reject(INSUFFICIENT_BALANCE)
    }
}

/// Pre-store admission check for the hosting relay.
///
/// Stateless: credit and usage are recomputed on every call and nothing is
/// written. Concurrent submissions from one author may each see the same
/// usage; see [`crate::payment::PayerLocks`] for the host-side remedy.
pub struct AdmissionGate {
    balance: BalanceCalculator,
    store: Arc<dyn EventStore>,
}

impl AdmissionGate {
    /// Create a gate reading payments from `upstream` and usage from `store`.
    #[must_use]
    pub fn new(
        config: AggregatorConfig,
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn EventStore>,
        valuator: Arc<dyn InvoiceValuator>,
    ) -> Self {
        info!(
            "Admission gate initialized (operator={}, upstream_relays={}, trusted_issuers={})",
            config.operator,
            upstream.endpoints().len(),
            config.trusted_issuers.len()
        );
        let aggregator = PaymentAggregator::new(upstream, config);
        Self {
            balance: BalanceCalculator::new(aggregator, valuator),
            store,
        }
    }

    /// The operator payments are counted towards.
    #[must_use]
    pub fn operator(&self) -> &str {
        self.balance.aggregator().operator()
    }

    /// Total credit of `author` in whole satoshis.
    pub async fn credit_for(&self, author: &str) -> u64 {
        self.balance.credit_for(author).await
    }

    /// Number of records stored for `author`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub async fn usage_of(&self, author: &str) -> Result<u64> {
        self.store
            .count_by_author(author)
            .await
            .map_err(|e| Error::Storage(format!("failed to count records of {author}: {e}")))
    }

    /// Credit minus usage; negative when the author is over-spent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub async fn remaining_balance(&self, author: &str) -> Result<i64> {
        let (credit, used) = tokio::join!(self.credit_for(author), self.usage_of(author));
        let used = used?;
        let credit = i64::try_from(credit).unwrap_or(i64::MAX);
        let used = i64::try_from(used).unwrap_or(i64::MAX);
        Ok(credit.saturating_sub(used))
    }

    /// Decide whether `record` may be stored.
    pub async fn check(&self, record: &Record) -> AdmissionDecision {
        let author = record.pubkey.as_str();
        let (credit, used) = tokio::join!(self.credit_for(author), self.usage_of(author));

        let used = match used {
            Ok(used) => used,
            Err(e) => {
                error!("Cannot verify balance for {}: {e}", record.id);
                return AdmissionDecision::reject(CANNOT_VERIFY);
            }
        };

        let decision = decide(credit, used);
        debug!(
            "Admission for {} by {author}: credit={credit} used={used} -> {decision:?}",
            record.id
        );
        decision
    }
}

#[async_trait]
impl EventPolicy for AdmissionGate {
    fn name(&self) -> &'static str {
        "payment"
    }

    async fn check(&self, record: &Record) -> AdmissionDecision {
        Self::check(self, record).await
    }
}
