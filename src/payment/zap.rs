//! Recovering the zap request embedded in a zap receipt.
//!
//! A receipt is signed by the payment processor, not the payer. The payer is
//! the author of the original zap request, which the processor copies as JSON
//! into the receipt's `description` tag.

use crate::record::{is_hex_pubkey, Record, Tag};
use serde::Deserialize;
use thiserror::Error;

/// Tag carrying the embedded zap request.
pub const DESCRIPTION_TAG: &str = "description";

/// The zap request as embedded in a receipt.
///
/// Only `pubkey` is required; everything else is carried for completeness and
/// defaults when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ZapRequest {
    /// The payer.
    pub pubkey: String,
    /// Zap comment.
    #[serde(default)]
    pub content: String,
    /// Zap request id.
    #[serde(default)]
    pub id: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: i64,
    /// Signature.
    #[serde(default)]
    pub sig: String,
    /// Kind (9734 for well-formed requests).
    #[serde(default)]
    pub kind: u16,
    /// Tags (recipient, relays, amount).
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Why a receipt yielded no zap request. Always a skip, never fatal.
#[derive(Debug, Error)]
pub enum ZapError {
    /// No `description` tag with a value.
    #[error("description tag not found")]
    MissingDescription,
    /// The description is not the expected JSON.
    #[error("error parsing description: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The description parsed but names no usable payer.
    #[error("description has no valid payer pubkey")]
    InvalidPayer,
}

/// Parse the zap request out of `receipt`.
///
/// # Errors
///
/// Returns a [`ZapError`] when the tag is missing, is not JSON, or lacks a
/// 64-hex-character `pubkey`.
pub fn extract_zap_request(receipt: &Record) -> Result<ZapRequest, ZapError> {
    let description = receipt
        .tag_value(DESCRIPTION_TAG)
        .filter(|d| !d.is_empty())
        .ok_or(ZapError::MissingDescription)?;

    let request: ZapRequest = serde_json::from_str(description)?;
    if !is_hex_pubkey(&request.pubkey) {
        return Err(ZapError::InvalidPayer);
    }
    Ok(request)
}
