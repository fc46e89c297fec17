//! Nostr records: the signed, timestamped content unit stored and relayed.
//!
//! The JSON shape is fixed by NIP-01 and reproduced field for field:
//! `id`, `pubkey`, `created_at`, `kind`, `tags`, `content`, `sig`. The same
//! shape is embedded verbatim inside zap receipts (see [`crate::payment`]).

mod filter;
mod keys;

pub use filter::Filter;
pub use keys::{is_hex_pubkey, verify_id, Keys};

use keys::is_lower_hex;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Text note.
pub const KIND_TEXT_NOTE: u16 = 1;
/// Zap receipt (NIP-57).
pub const KIND_ZAP_RECEIPT: u16 = 9735;
/// Long-form article (NIP-23).
pub const KIND_LONG_FORM: u16 = 30023;

/// A tag: an ordered list of strings, the first being the tag name.
pub type Tag = Vec<String>;

/// A signed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Author's hex x-only public key.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Kind discriminator.
    pub kind: u16,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Content.
    pub content: String,
    /// Hex schnorr signature over `id`.
    pub sig: String,
}

impl Record {
    /// Value of the first tag named `name` that carries a value.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() > 1 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Values of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.len() > 1 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Check that `id` matches the content and `sig` verifies against `pubkey`.
    ///
    /// `id`, `pubkey` and `sig` must be lowercase hex. Authors are compared
    /// as strings, so a case variant of a key would otherwise pass as a
    /// different author.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] when any check fails.
    pub fn verify(&self) -> Result<()> {
        if !is_lower_hex(&self.id, 64) {
            return Err(Error::InvalidRecord("id must be 64 lowercase hex characters".into()));
        }
        if !is_hex_pubkey(&self.pubkey) {
            return Err(Error::InvalidRecord(
                "pubkey must be 64 lowercase hex characters".into(),
            ));
        }
        if !is_lower_hex(&self.sig, 128) {
            return Err(Error::InvalidRecord(
                "sig must be 128 lowercase hex characters".into(),
            ));
        }
        let digest = canonical_digest(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(digest) != self.id {
            return Err(Error::InvalidRecord(format!("id mismatch for {}", self.id)));
        }
        verify_id(&self.pubkey, digest, &self.sig)
            .map_err(|e| Error::InvalidRecord(format!("bad signature on {}: {e}", self.id)))
    }
}

/// A record that has not been signed yet.
#[derive(Debug, Clone)]
pub struct UnsignedRecord {
    created_at: i64,
    kind: u16,
    tags: Vec<Tag>,
    content: String,
}

impl UnsignedRecord {
    /// Start a record of `kind` with the given content, timestamped now.
    #[must_use]
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: chrono::Utc::now().timestamp(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    #[must_use]
    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Compute the id and sign it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn sign(self, keys: &Keys) -> Result<Record> {
        let pubkey = keys.public_key().to_string();
        let digest = canonical_digest(
            &pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        Ok(Record {
            id: hex::encode(digest),
            sig: keys.sign_id(digest),
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        })
    }
}

/// SHA-256 of `[0, pubkey, created_at, kind, tags, content]`.
fn canonical_digest(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let canonical = serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))?;
    Ok(Sha256::digest(canonical).into())
}
