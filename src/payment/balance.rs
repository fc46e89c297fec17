//! Turning a payer's receipts into whole-satoshi credit.

use crate::payment::aggregator::PaymentAggregator;
use crate::payment::invoice::{msats_to_sats, InvoiceValuator, BOLT11_TAG};
use crate::record::Record;
use std::sync::Arc;
use tracing::debug;

/// Computes a payer's total credit from their receipts.
pub struct BalanceCalculator {
    aggregator: PaymentAggregator,
    valuator: Arc<dyn InvoiceValuator>,
}

impl BalanceCalculator {
    /// Create a calculator over `aggregator`, valuing invoices with `valuator`.
    #[must_use]
    pub fn new(aggregator: PaymentAggregator, valuator: Arc<dyn InvoiceValuator>) -> Self {
        Self {
            aggregator,
            valuator,
        }
    }

    /// The aggregator receipts are drawn from.
    #[must_use]
    pub fn aggregator(&self) -> &PaymentAggregator {
        &self.aggregator
    }

    /// Total credit of `payer` in whole satoshis.
    pub async fn credit_for(&self, payer: &str) -> u64 {
        let receipts = self.aggregator.receipts_from(payer).await;
        sum_credit(receipts.values(), self.valuator.as_ref())
    }
}

/// Sum the invoice amounts of `receipts` and truncate to whole satoshis.
///
/// Receipts without a valuable `bolt11` tag contribute nothing. The caller
/// is responsible for passing each receipt once.
pub fn sum_credit<'a>(
    receipts: impl IntoIterator<Item = &'a Record>,
    valuator: &dyn InvoiceValuator,
) -> u64 {
    let total_msats = receipts
        .into_iter()
        .filter_map(|receipt| {
            let Some(invoice) = receipt.tag_value(BOLT11_TAG) else {
                debug!("Receipt {} has no invoice", receipt.id);
                return None;
            };
            valuator
                .amount_msats(invoice)
                .map_err(|e| debug!("Receipt {}: {e}", receipt.id))
                .ok()
        })
        .fold(0u64, u64::saturating_add);
    msats_to_sats(total_msats)
}
