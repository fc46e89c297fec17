//! Invoice valuation.
//!
//! Decoding an invoice is delegated to an [`InvoiceValuator`]; the engine
//! only consumes the amount.

use lightning_invoice::Bolt11Invoice;
use thiserror::Error;

/// Tag carrying the paid invoice on a zap receipt.
pub const BOLT11_TAG: &str = "bolt11";

/// Millisatoshis per satoshi.
pub const MSATS_PER_SAT: u64 = 1_000;

/// Why an invoice could not be valued. Always a skip, never fatal.
#[derive(Debug, Error)]
pub enum InvoiceError {
    /// Not a well-formed invoice.
    #[error("malformed invoice: {0}")]
    Malformed(String),
    /// Well-formed but amountless.
    #[error("invoice carries no amount")]
    NoAmount,
}

/// Decodes an invoice string into the amount it encodes.
pub trait InvoiceValuator: Send + Sync {
    /// Amount in millisatoshis.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid invoice with an amount.
    fn amount_msats(&self, invoice: &str) -> Result<u64, InvoiceError>;
}

/// BOLT-11 valuator backed by `lightning-invoice`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bolt11Valuator;

impl InvoiceValuator for Bolt11Valuator {
    fn amount_msats(&self, invoice: &str) -> Result<u64, InvoiceError> {
        let invoice: Bolt11Invoice = invoice
            .trim()
            .parse()
            .map_err(|e: lightning_invoice::ParseOrSemanticError| {
                InvoiceError::Malformed(e.to_string())
            })?;
        invoice.amount_milli_satoshis().ok_or(InvoiceError::NoAmount)
    }
}

/// Whole satoshis in `msats`, discarding the remainder.
#[must_use]
pub const fn msats_to_sats(msats: u64) -> u64 {
    msats / MSATS_PER_SAT
}
