//! Ed25519 signature verification against strkey-encoded account addresses.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("account address does not decode to a valid ed25519 public key")]
    BadAddress,
    #[error("signature is not valid base64 or not 64 bytes")]
    MalformedSignature,
    #[error("signature does not verify against the account's public key")]
    BadSignature,
}

/// Decodes a "G..." strkey text address into its raw 32-byte Ed25519
/// public key.
fn decode_account(account: &str) -> Result<VerifyingKey, VerifyError> {
    let decoded = stellar_strkey::ed25519::PublicKey::from_string(account)
        .map_err(|_| VerifyError::BadAddress)?;
    VerifyingKey::from_bytes(&decoded.0).map_err(|_| VerifyError::BadAddress)
}

/// Verifies `signature_b64` (base64-encoded, 64 bytes) against `digest`
/// using the public key decoded from `account`.
pub fn verify(account: &str, digest: &[u8; 32], signature_b64: &str) -> Result<(), VerifyError> {
    let key = decode_account(account)?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| VerifyError::MalformedSignature)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| VerifyError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify(digest, &signature)
        .map_err(|_| VerifyError::BadSignature)
}
