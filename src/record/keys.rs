//! secp256k1 schnorr keys for signing records.

use crate::error::{Error, Result};
use secp256k1::{schnorr, All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// A signing keypair together with its hex-encoded x-only public key.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: String,
}

impl Keys {
    /// Load keys from a hex-encoded 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not hex or not a valid secret key.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| Error::Crypto(format!("secret key is not hex: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_keypair(Keypair::from_secret_key(&SECP, &secret)))
    }

    /// Generate a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::new(&SECP, &mut rand::thread_rng()))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let (xonly, _parity) = keypair.x_only_public_key();
        Self {
            keypair,
            public_key: hex::encode(xonly.serialize()),
        }
    }

    /// Hex-encoded x-only public key.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Hex-encoded secret key.
    #[must_use]
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_key().secret_bytes())
    }

    /// Sign a 32-byte record id, returning the hex signature.
    #[must_use]
    pub fn sign_id(&self, id: [u8; 32]) -> String {
        let msg = Message::from_digest(id);
        SECP.sign_schnorr_no_aux_rand(&msg, &self.keypair).to_string()
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Verify a hex schnorr signature over a record id.
///
/// # Errors
///
/// Returns an error if the key or signature cannot be parsed or does not verify.
pub fn verify_id(public_key: &str, id: [u8; 32], sig: &str) -> Result<()> {
    let pubkey = XOnlyPublicKey::from_str(public_key)?;
    let sig = schnorr::Signature::from_str(sig)?;
    SECP.verify_schnorr(&sig, &Message::from_digest(id), &pubkey)?;
    Ok(())
}

/// Whether `s` is a hex x-only public key: 64 lowercase hex characters.
#[must_use]
pub fn is_hex_pubkey(s: &str) -> bool {
    is_lower_hex(s, 64)
}

/// Whether `s` is exactly `len` lowercase hex characters.
pub(crate) fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
