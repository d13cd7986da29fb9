//! Account ownership proofs
//!
//! An account address is the hex-encoded ed25519 public key of its owner.
//! Mutating calls carry a signature over a fixed challenge string made with
//! the matching secret key.

use crate::common::types::normalize_hex;
use crate::errors::UserError;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};

/// Signature over the ownership challenge, hex encoded
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipProof {
    pub signature: String,
}

impl OwnershipProof {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

pub fn verify_ownership(address: &str, challenge: &str, proof: &OwnershipProof) -> Result<(), UserError> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = decode_fixed("address", address)?;
    let signature_bytes: [u8; SIGNATURE_LENGTH] = decode_fixed("signature", &proof.signature)?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| UserError::InvalidProof(format!("address is not a valid public key: {}", e)))?;
    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(challenge.as_bytes(), &signature)
        .map_err(|_| UserError::InvalidProof("signature does not match account".to_string()))
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], UserError> {
    let bytes = hex::decode(normalize_hex(value)).map_err(|e| UserError::InvalidHex {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|bytes: Vec<u8>| UserError::InvalidHex {
        field: field.to_string(),
        reason: format!("expected {} bytes, got {}", N, bytes.len()),
    })
}
