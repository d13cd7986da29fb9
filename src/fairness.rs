//! Provably-fair outcome resolution
//!
//! `outcome = SHA-256(client_seed ‖ nonce ‖ secret)` over a fixed 96-byte
//! preimage:
//! - client seed, left-padded with zeros to 32 bytes (absent means all zeros)
//! - nonce, as a 32-byte big-endian unsigned integer
//! - secret, 32 bytes
//!
//! Anyone holding the revealed secret can replay the computation and check it
//! against the commitment that was published before the bet.

use crate::common::types::{normalize_hex, Nonce};
use crate::errors::{SettleResult, UserError};
use crate::metrics::SettlerMetrics;
use crate::secrets::{commitment_hash, generate_secret, Secret, SecretCommitmentStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub type OutcomeHash = [u8; 32];

/// Everything a third party needs to replay an outcome
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FairnessProof {
    pub client_seed: String,
    pub nonce: Nonce,
    pub secret: String,
    pub hashed_secret: String,
    pub outcome_hash: String,
    /// False when the secret was generated at resolution time rather than
    /// committed to in advance
    pub legitimate: bool,
}

impl FairnessProof {
    pub fn outcome_bytes(&self) -> SettleResult<OutcomeHash> {
        decode_32("outcome_hash", &self.outcome_hash)
    }
}

/// Decode a client seed, left-padding it to 32 bytes.
pub fn parse_client_seed(client_seed_hex: Option<&str>) -> SettleResult<[u8; 32]> {
    let mut seed = [0u8; 32];
    let raw = match client_seed_hex.map(normalize_hex) {
        Some(hex_str) if !hex_str.is_empty() => hex_str,
        _ => return Ok(seed),
    };

    let padded = if raw.len() % 2 == 1 {
        format!("0{}", raw)
    } else {
        raw
    };
    let bytes = hex::decode(&padded).map_err(|e| UserError::InvalidHex {
        field: "client_seed".to_string(),
        reason: e.to_string(),
    })?;
    if bytes.len() > 32 {
        return Err(UserError::InvalidHex {
            field: "client_seed".to_string(),
            reason: format!("{} bytes exceeds 32", bytes.len()),
        }
        .into());
    }

    seed[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(seed)
}

fn decode_32(field: &str, value: &str) -> SettleResult<[u8; 32]> {
    let bytes = hex::decode(normalize_hex(value)).map_err(|e| UserError::InvalidHex {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    bytes.as_slice().try_into().map_err(|_| {
        UserError::InvalidHex {
            field: field.to_string(),
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        }
        .into()
    })
}

/// Compute the outcome hash. Pure.
pub fn resolve(client_seed: &[u8; 32], nonce: Nonce, secret: &Secret) -> OutcomeHash {
    let mut nonce_word = [0u8; 32];
    nonce_word[24..].copy_from_slice(&nonce.to_be_bytes());

    let mut hasher = Sha256::new();
    hasher.update(client_seed);
    hasher.update(nonce_word);
    hasher.update(secret);
    hasher.finalize().into()
}

/// Hex-in, hex-out variant of [`resolve`].
pub fn resolve_hex(client_seed_hex: Option<&str>, nonce: Nonce, secret_hex: &str) -> SettleResult<String> {
    let seed = parse_client_seed(client_seed_hex)?;
    let secret = decode_32("secret", secret_hex)?;
    Ok(hex::encode(resolve(&seed, nonce, &secret)))
}

/// Build a proof from an already-known secret.
pub fn prove(client_seed: &[u8; 32], nonce: Nonce, secret: &Secret, legitimate: bool) -> FairnessProof {
    FairnessProof {
        client_seed: hex::encode(client_seed),
        nonce,
        secret: hex::encode(secret),
        hashed_secret: commitment_hash(secret),
        outcome_hash: hex::encode(resolve(client_seed, nonce, secret)),
        legitimate,
    }
}

/// Check that the secret matches its commitment and the outcome replays.
pub fn verify(proof: &FairnessProof) -> bool {
    let Ok(seed) = parse_client_seed(Some(&proof.client_seed)) else {
        return false;
    };
    let Ok(secret) = decode_32("secret", &proof.secret) else {
        return false;
    };

    commitment_hash(&secret) == normalize_hex(&proof.hashed_secret)
        && hex::encode(resolve(&seed, proof.nonce, &secret)) == normalize_hex(&proof.outcome_hash)
}

/// Resolves outcomes against the live secret commitments.
#[derive(Clone)]
pub struct RandomnessResolver {
    secrets: Arc<SecretCommitmentStore>,
    metrics: Arc<SettlerMetrics>,
}

impl RandomnessResolver {
    pub fn new(secrets: Arc<SecretCommitmentStore>, metrics: Arc<SettlerMetrics>) -> Self {
        Self { secrets, metrics }
    }

    pub fn secrets(&self) -> &Arc<SecretCommitmentStore> {
        &self.secrets
    }

    /// Reveal the committed secret and compute the outcome.
    ///
    /// A missing, expired or already-used commitment does not fail the call:
    /// a fresh secret is drawn and the proof is flagged illegitimate.
    pub fn resolve_commitment(
        &self,
        client_seed_hex: Option<&str>,
        nonce: Nonce,
        hashed_secret: Option<&str>,
        source: &str,
    ) -> SettleResult<FairnessProof> {
        let seed = parse_client_seed(client_seed_hex)?;

        let revealed = hashed_secret
            .filter(|h| !h.trim().is_empty())
            .and_then(|h| self.secrets.reveal(h));

        let proof = match revealed {
            Some(secret) => prove(&seed, nonce, &secret, true),
            None => {
                let proof = prove(&seed, nonce, &generate_secret(), false);
                self.metrics
                    .illegitimate_fairness
                    .with_label_values(&[source])
                    .inc();
                tracing::warn!(
                    source,
                    nonce,
                    requested_hash = hashed_secret.unwrap_or("<none>"),
                    "no live commitment, resolving with an uncommitted secret"
                );
                proof
            }
        };

        tracing::debug!(
            source,
            nonce,
            outcome = %proof.outcome_hash,
            legitimate = proof.legitimate,
            "resolved outcome"
        );
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_resolve_is_deterministic() {
        let seed = [7u8; 32];
        let secret = [9u8; 32];
        assert_eq!(resolve(&seed, 3, &secret), resolve(&seed, 3, &secret));
        assert_ne!(resolve(&seed, 3, &secret), resolve(&seed, 4, &secret));
    }

    #[test]
    fn test_preimage_layout() {
        let seed = parse_client_seed(Some("0x0102")).unwrap();
        let secret = [0xAAu8; 32];

        let mut preimage = Vec::with_capacity(96);
        preimage.extend_from_slice(&[0u8; 30]);
        preimage.extend_from_slice(&[0x01, 0x02]);
        preimage.extend_from_slice(&[0u8; 31]);
        preimage.push(5);
        preimage.extend_from_slice(&secret);

        let expected: [u8; 32] = Sha256::digest(&preimage).into();
        assert_eq!(resolve(&seed, 5, &secret), expected);
    }

    #[test]
    fn test_absent_seed_is_zero() {
        assert_eq!(parse_client_seed(None).unwrap(), [0u8; 32]);
        assert_eq!(parse_client_seed(Some("")).unwrap(), [0u8; 32]);
        assert_eq!(parse_client_seed(Some("0x")).unwrap(), [0u8; 32]);
    }

    #[test]
    fn test_odd_length_seed_is_padded() {
        let seed = parse_client_seed(Some("abc")).unwrap();
        assert_eq!(&seed[30..], &[0x0a, 0xbc]);
    }

    #[test]
    fn test_bad_seed_rejected() {
        assert!(parse_client_seed(Some("zz")).is_err());
        let too_long = "11".repeat(33);
        assert!(parse_client_seed(Some(&too_long)).is_err());
    }

    #[test]
    fn test_resolve_hex_matches_bytes() {
        let secret = [1u8; 32];
        let out = resolve_hex(Some("ff"), 10, &hex::encode(secret)).unwrap();
        let seed = parse_client_seed(Some("ff")).unwrap();
        assert_eq!(out, hex::encode(resolve(&seed, 10, &secret)));
    }

    #[test]
    fn test_verify() {
        let proof = prove(&[2u8; 32], 8, &[3u8; 32], true);
        assert!(verify(&proof));

        let mut tampered = proof.clone();
        tampered.nonce = 9;
        assert!(!verify(&tampered));

        let mut wrong_commitment = proof;
        wrong_commitment.hashed_secret = "00".repeat(32);
        assert!(!verify(&wrong_commitment));
    }

    fn resolver() -> RandomnessResolver {
        let metrics = Arc::new(SettlerMetrics::unregistered().unwrap());
        let store = SecretCommitmentStore::new(Duration::from_secs(60), metrics.clone()).unwrap();
        RandomnessResolver::new(Arc::new(store), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_secret_is_legitimate() {
        let resolver = resolver();
        let hash = resolver.secrets().request_commitment().unwrap();

        let proof = resolver
            .resolve_commitment(Some("01"), 0, Some(&hash), "test")
            .unwrap();
        assert!(proof.legitimate);
        assert_eq!(proof.hashed_secret, hash);
        assert!(verify(&proof));

        let again = resolver
            .resolve_commitment(Some("01"), 0, Some(&hash), "test")
            .unwrap();
        assert!(!again.legitimate);
        assert_ne!(again.hashed_secret, hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_commitment_is_illegitimate() {
        let resolver = resolver();
        let proof = resolver.resolve_commitment(None, 1, None, "test").unwrap();
        assert!(!proof.legitimate);
        assert!(verify(&proof));
    }
}
