//! Shared type definitions for the settlement daemon
//!
//! Chain-facing records (events, orders, receipts, checkpoints) and the
//! durable ledger rows. Everything here is plain data; behaviour lives in
//! the services that own these records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Credit amounts, in the token's smallest unit
pub type Credits = u128;

/// Order nonce within one purpose index
pub type Nonce = u64;

/// Contract-defined discriminator separating independent order streams
pub type PurposeIndex = u32;

/// Last-synced block per tracked event type
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub event_name: String,
    /// Genesis block of the contract; immutable once stored
    pub block_created: u64,
    /// Last fully-synced block; `None` until the first window completes
    pub block_sync: Option<u64>,
}

impl SyncCheckpoint {
    /// Fresh checkpoint with nothing synced yet.
    pub fn at_genesis(event_name: impl Into<String>, genesis: u64) -> Self {
        Self {
            event_name: event_name.into(),
            block_created: genesis,
            block_sync: None,
        }
    }

    /// First block the next sync cycle must cover.
    pub fn next_block(&self) -> u64 {
        self.block_sync.map_or(self.block_created, |synced| synced + 1)
    }
}

/// Contract event kinds the daemon understands
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    OrderRequested,
    OrderProcessed,
    Other { name: String },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::OrderRequested => write!(f, "OrderRequested"),
            EventKind::OrderProcessed => write!(f, "OrderProcessed"),
            EventKind::Other { name } => write!(f, "{}", name),
        }
    }
}

/// Decoded event body
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    OrderRequested {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        /// Hex-encoded client seed; absent means the zero seed
        client_seed: Option<String>,
        /// Hex-encoded commitment the order was placed against
        hashed_secret: Option<String>,
    },
    OrderProcessed {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        /// Hex-encoded randomness the settlement used
        randomness: String,
    },
    Raw {
        data: String,
    },
}

/// One log emitted by a tracked contract
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainEvent {
    pub contract: String,
    pub kind: EventKind,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub payload: EventPayload,
}

impl ChainEvent {
    /// Name of the (contract, event type) stream this event belongs to.
    pub fn stream_name(&self) -> String {
        stream_name(&self.contract, &self.kind)
    }

    /// Identifying tuple; re-delivery of the same tuple is a no-op.
    pub fn identity(&self) -> (String, u64, String, u32) {
        (
            self.stream_name(),
            self.block_number,
            self.tx_hash.clone(),
            self.log_index,
        )
    }

    /// Interpret the event as an order request, if it is one.
    pub fn as_order(&self) -> Option<OrderRecord> {
        match &self.payload {
            EventPayload::OrderRequested {
                purpose_index,
                nonce,
                client_seed,
                hashed_secret,
            } => Some(OrderRecord {
                contract: self.contract.clone(),
                purpose_index: *purpose_index,
                nonce: *nonce,
                block_number: self.block_number,
                tx_hash: self.tx_hash.clone(),
                client_seed: client_seed.clone(),
                hashed_secret: hashed_secret.clone(),
            }),
            _ => None,
        }
    }

    /// `(purpose_index, nonce)` of a settlement event.
    pub fn processed_nonce(&self) -> Option<(PurposeIndex, Nonce)> {
        match &self.payload {
            EventPayload::OrderProcessed {
                purpose_index,
                nonce,
                ..
            } => Some((*purpose_index, *nonce)),
            _ => None,
        }
    }
}

/// Canonical stream name for a contract event type
pub fn stream_name(contract: &str, kind: &EventKind) -> String {
    format!("{}:{}", contract.to_lowercase(), kind)
}

/// An order awaiting (or having received) settlement
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderRecord {
    pub contract: String,
    pub purpose_index: PurposeIndex,
    pub nonce: Nonce,
    pub block_number: u64,
    pub tx_hash: String,
    pub client_seed: Option<String>,
    pub hashed_secret: Option<String>,
}

/// Receipt of a mined transaction
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<ChainEvent>,
}

/// How a purpose index expects its orders to be settled
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Randomness only; the contract trusts the daemon
    #[default]
    Basic,
    /// Randomness now, secret published in a follow-up call
    TwoStep,
    /// Contract re-hashes the revealed secret against the stored commitment
    OnChainSecure,
    /// Commitment was handed out over the API; secret is revealed with the randomness
    ApiSecure,
}

/// Write call submitted to settle one order
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SettlementCall {
    Fulfill {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        randomness: String,
    },
    FulfillThenReveal {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        randomness: String,
        secret: String,
    },
    RevealOnChain {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        secret: String,
    },
    RevealWithRandomness {
        purpose_index: PurposeIndex,
        nonce: Nonce,
        secret: String,
        randomness: String,
    },
}

impl SettlementCall {
    pub fn nonce(&self) -> Nonce {
        match self {
            SettlementCall::Fulfill { nonce, .. }
            | SettlementCall::FulfillThenReveal { nonce, .. }
            | SettlementCall::RevealOnChain { nonce, .. }
            | SettlementCall::RevealWithRandomness { nonce, .. } => *nonce,
        }
    }

    pub fn purpose_index(&self) -> PurposeIndex {
        match self {
            SettlementCall::Fulfill { purpose_index, .. }
            | SettlementCall::FulfillThenReveal { purpose_index, .. }
            | SettlementCall::RevealOnChain { purpose_index, .. }
            | SettlementCall::RevealWithRandomness { purpose_index, .. } => *purpose_index,
        }
    }
}

/// Account identity on one chain
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AccountKey {
    pub chain_id: u64,
    pub address: String,
}

impl AccountKey {
    pub fn new(chain_id: u64, address: &str) -> Self {
        Self {
            chain_id,
            address: address.to_lowercase(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.address)
    }
}

/// Durable off-chain credit row for one account
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: String,
    pub chain_id: u64,
    /// Last-known on-chain purchased total
    pub bought_total: Credits,
    /// Last-known on-chain airdropped total
    pub airdropped_total: Credits,
    pub withdrawable: Credits,
    pub sluggish: Credits,
    pub plays_since_withdraw: u64,
    /// Lifetime bet count; doubles as the off-chain fairness nonce
    #[serde(default)]
    pub total_plays: u64,
    /// Last-known on-chain paid-out total
    #[serde(default)]
    pub withdrawn_total: Credits,
    /// Debited payouts not yet seen in the on-chain paid-out total
    #[serde(default)]
    pub pending_payout: Credits,
}

impl AccountBalance {
    pub fn empty(key: &AccountKey) -> Self {
        Self {
            address: key.address.clone(),
            chain_id: key.chain_id,
            bought_total: 0,
            airdropped_total: 0,
            withdrawable: 0,
            sluggish: 0,
            plays_since_withdraw: 0,
            total_plays: 0,
            withdrawn_total: 0,
            pending_payout: 0,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.chain_id, &self.address)
    }

    /// Total credits available for play.
    pub fn spendable(&self) -> Credits {
        self.withdrawable.saturating_add(self.sluggish)
    }
}

/// On-chain purchase and payout totals for one account
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OnChainTotals {
    pub bought: Credits,
    pub airdropped: Credits,
    #[serde(default)]
    pub withdrawn: Credits,
}

/// Result of one game round
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetOutcome {
    pub wager: Credits,
    pub amount_won: Credits,
    pub outcome_value: String,
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Strip one optional `0x`/`0X` prefix and lowercase the remaining hex digits.
pub fn normalize_hex(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
        .to_lowercase()
}
