//! Error types for spring83-core.

use thiserror::Error;

/// Errors that can occur while handling keys, signatures and boards.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("key search gave up after {0} attempts")]
    KeySearchExhausted(u64),
}

/// Result type alias for spring83-core operations.
pub type Result<T> = std::result::Result<T, Error>;
