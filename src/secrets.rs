//! Secret commitments with timed disposal
//!
//! A commitment is handed out as `SHA-256(secret)` before a bet is placed and
//! the secret is revealed once, when the order is settled. Entries never touch
//! disk: a restart forgets every live secret, and orders placed against a
//! forgotten commitment resolve with a fresh, illegitimate secret instead.

use crate::config::MIN_SECRET_TTL;
use crate::errors::{ConfigurationError, InfraError, SettleResult};
use crate::metrics::SettlerMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type Secret = [u8; 32];

struct Commitment {
    secret: Secret,
    deadline: Instant,
    generation: u64,
    disposal: CancellationToken,
}

/// Draw a fresh secret from the OS RNG.
pub fn generate_secret() -> Secret {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    secret
}

/// Hex-encoded SHA-256 commitment to a secret.
pub fn commitment_hash(secret: &Secret) -> String {
    hex::encode(Sha256::digest(secret))
}

pub struct SecretCommitmentStore {
    entries: Arc<DashMap<String, Commitment>>,
    ttl: Duration,
    generation: AtomicU64,
    shutting_down: AtomicBool,
    metrics: Arc<SettlerMetrics>,
}

impl SecretCommitmentStore {
    pub fn new(ttl: Duration, metrics: Arc<SettlerMetrics>) -> Result<Self, ConfigurationError> {
        if ttl < MIN_SECRET_TTL {
            return Err(ConfigurationError::InvalidValue {
                field: "secrets.ttl_secs".to_string(),
                reason: format!(
                    "{}s is below the {}s minimum",
                    ttl.as_secs_f64(),
                    MIN_SECRET_TTL.as_secs()
                ),
            });
        }

        Ok(Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            metrics,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a new commitment and return only its hash.
    ///
    /// Must be called from within a tokio runtime; each entry owns a disposal
    /// timer task.
    pub fn request_commitment(&self) -> SettleResult<String> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(InfraError::ShuttingDown.into());
        }

        loop {
            let secret = generate_secret();
            let hash = commitment_hash(&secret);

            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            let disposal = CancellationToken::new();
            match self.entries.entry(hash.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!(hash = %hash, "secret hash collided with a live entry, regenerating");
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(Commitment {
                        secret,
                        deadline: Instant::now() + self.ttl,
                        generation,
                        disposal: disposal.clone(),
                    });
                }
            }

            self.metrics.live_secrets.inc();
            self.spawn_disposal(hash.clone(), generation, disposal);
            tracing::debug!(hash = %hash, ttl_secs = self.ttl.as_secs(), "issued secret commitment");
            return Ok(hash);
        }
    }

    fn spawn_disposal(&self, hash: String, generation: u64, disposal: CancellationToken) {
        let entries = self.entries.clone();
        let metrics = self.metrics.clone();
        let ttl = self.ttl;

        tokio::spawn(async move {
            tokio::select! {
                _ = disposal.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    if entries.remove_if(&hash, |_, c| c.generation == generation).is_some() {
                        metrics.live_secrets.dec();
                        tracing::info!(hash = %hash, "secret expired without reveal");
                    }
                }
            }
        });
    }

    /// Remove and return the secret behind `hash`, exactly once.
    ///
    /// Returns `None` for unknown hashes, repeat reveals and reveals after the
    /// deadline, even if the disposal task has not run yet.
    pub fn reveal(&self, hash: &str) -> Option<Secret> {
        let key = crate::common::types::normalize_hex(hash);
        let (_, commitment) = self.entries.remove(&key)?;
        commitment.disposal.cancel();
        self.metrics.live_secrets.dec();

        if Instant::now() >= commitment.deadline {
            tracing::info!(hash = %key, "secret revealed after its deadline, discarding");
            return None;
        }

        tracing::debug!(hash = %key, "secret revealed");
        Some(commitment.secret)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries
            .contains_key(&crate::common::types::normalize_hex(hash))
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Refuse new commitments. Live entries keep their timers.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!(live = self.entries.len(), "secret store shutting down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
