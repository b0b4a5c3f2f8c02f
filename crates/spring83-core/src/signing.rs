//! Ed25519 board signing and verification.
//!
//! A board is signed over its exact bytes, and the signature travels
//! hex-encoded in the `Spring-Signature` header. The verifying key is
//! the board's key identifier, hex-decoded.
//!
//! Verification fails closed: a malformed key, a signature of the wrong
//! length, or a bad signature all collapse to `false` in [`verify`].

use ed25519_dalek::{SIGNATURE_LENGTH, Signature, Signer, SigningKey, VerifyingKey};

use crate::error::{Error, Result};
use crate::key::BoardKey;

/// Sign board bytes with an Ed25519 signing key.
/// Returns the 64-byte signature.
pub fn sign(signing_key: &SigningKey, board: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    signing_key.sign(board).to_bytes()
}

/// Sign board bytes and hex-encode the signature for the wire.
pub fn sign_hex(signing_key: &SigningKey, board: &[u8]) -> String {
    hex::encode(sign(signing_key, board))
}

/// Decode a `Spring-Signature` header value.
///
/// Surrounding whitespace is ignored and hex digits may be either case.
pub fn decode_signature(header: &str) -> Result<[u8; SIGNATURE_LENGTH]> {
    let mut bytes = [0u8; SIGNATURE_LENGTH];
    hex::decode_to_slice(header.trim(), &mut bytes)
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;
    Ok(bytes)
}

/// Verify a signature over `board` under the key encoded by `key`.
pub fn verify_detached(key: &BoardKey, board: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = key.public_key_bytes()?;
    let verifying_key = VerifyingKey::from_bytes(&public_key)
        .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

    let signature = Signature::from_slice(signature)
        .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;

    verifying_key
        .verify_strict(board, &signature)
        .map_err(|_| Error::SignatureVerificationFailed)
}

/// Fail-closed verification: `true` only for a valid signature.
pub fn verify(key: &BoardKey, board: &[u8], signature: &[u8]) -> bool {
    verify_detached(key, board, signature).is_ok()
}

/// Fail-closed verification of a hex-encoded header value.
pub fn verify_header(key: &BoardKey, board: &[u8], header: Option<&str>) -> bool {
    match header.map(decode_signature) {
        Some(Ok(signature)) => verify(key, board, &signature),
        _ => false,
    }
}
