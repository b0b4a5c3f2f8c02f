//! Publisher key management.
//!
//! Handles Ed25519 keypair generation and the mapping from a public key
//! to its board key identifier. Secret keys stay with the publisher;
//! the server only ever sees identifiers.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{Error, Result};
use crate::key::BoardKey;

/// Roughly one random key in 224k is a valid identifier, so this bound
/// gives up only after an extremely unlucky search.
pub const DEFAULT_MINT_ATTEMPTS: u64 = 50_000_000;

/// A publisher keypair (Ed25519).
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair using the OS cryptographic RNG.
    ///
    /// The public key is almost never a valid board key; use [`Keypair::mint`]
    /// to get one that is.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self { signing }
    }

    /// Search random keypairs until one's public key is a valid board key.
    pub fn mint() -> Result<Self> {
        Self::mint_within(DEFAULT_MINT_ATTEMPTS)
    }

    /// Like [`Keypair::mint`], giving up after `max_attempts` keypairs.
    pub fn mint_within(max_attempts: u64) -> Result<Self> {
        for _ in 0..max_attempts {
            let candidate = Self::generate();
            if candidate.board_key().is_ok() {
                return Ok(candidate);
            }
        }
        Err(Error::KeySearchExhausted(max_attempts))
    }

    /// Create a keypair from existing secret key bytes (32 bytes).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(bytes);
        Self { signing }
    }

    /// Create a keypair from a hex-encoded 32-byte secret.
    pub fn from_secret_hex(text: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(text.trim(), &mut bytes)
            .map_err(|e| Error::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    /// Get the signing key (private). Handle with care.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Get the verifying key (public). Safe to share.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Get the public key as raw bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    /// The public key as lowercase hex, valid identifier or not.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Hex-encoded secret key, the format `from_secret_hex` reads.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing.as_bytes())
    }

    /// The board key identifier for this keypair, if its public key is one.
    pub fn board_key(&self) -> Result<BoardKey> {
        BoardKey::parse(&self.public_key_hex())
    }
}
