//! Gathering a payer's zap receipts from the upstream relays.
//!
//! Receipts are addressed to the operator with a `p` tag. Every call goes to
//! the network; nothing is cached between calls.

use crate::payment::zap::extract_zap_request;
use crate::record::{Filter, Record, KIND_ZAP_RECEIPT};
use crate::upstream::Upstream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the payment aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Public key payments must be addressed to.
    pub operator: String,
    /// Deadline for one multi-relay fetch.
    pub query_timeout: Duration,
    /// When non-empty, only receipts signed by these keys are trusted.
    pub trusted_issuers: Vec<String>,
}

impl AggregatorConfig {
    /// Configuration for `operator` with defaults for everything else.
    #[must_use]
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            query_timeout: Duration::from_secs(10),
            trusted_issuers: Vec::new(),
        }
    }
}

/// Collects a payer's receipts across the configured upstream relays.
pub struct PaymentAggregator {
    upstream: Arc<dyn Upstream>,
    config: AggregatorConfig,
}

impl PaymentAggregator {
    /// Create an aggregator reading from `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>, config: AggregatorConfig) -> Self {
        Self { upstream, config }
    }

    /// The operator payments are counted towards.
    #[must_use]
    pub fn operator(&self) -> &str {
        &self.config.operator
    }

    /// Filter selecting every receipt addressed to the operator.
    #[must_use]
    pub fn receipt_filter(&self) -> Filter {
        let filter = Filter::new()
            .kinds([KIND_ZAP_RECEIPT])
            .tag('p', [self.config.operator.clone()]);
        if self.config.trusted_issuers.is_empty() {
            filter
        } else {
            filter.authors(self.config.trusted_issuers.iter().cloned())
        }
    }

    /// Every receipt paid by `payer`, keyed by receipt id.
    pub async fn receipts_from(&self, payer: &str) -> HashMap<String, Record> {
        let fetched = self
            .upstream
            .fetch(&self.receipt_filter(), self.config.query_timeout)
            .await;
        let fetched_count = fetched.len();
        let receipts = select_receipts(fetched, payer);

        info!(
            "Found {} receipts from {payer} among {fetched_count} fetched",
            receipts.len()
        );
        receipts
    }
}

/// Keep the receipts whose embedded zap request names `payer`, one per id.
pub fn select_receipts(
    receipts: impl IntoIterator<Item = Record>,
    payer: &str,
) -> HashMap<String, Record> {
    let mut selected = HashMap::new();
    for receipt in receipts {
        if selected.contains_key(&receipt.id) {
            continue;
        }
        match extract_zap_request(&receipt) {
            Ok(request) if request.pubkey == payer => {
                selected.insert(receipt.id.clone(), receipt);
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping receipt {}: {e}", receipt.id),
        }
    }
    selected
}
