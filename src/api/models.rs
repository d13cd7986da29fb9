//! Request and response types of the casino facade

use super::auth::OwnershipProof;
use crate::common::types::Credits;
use crate::fairness::FairnessProof;
use crate::games::GameType;
use crate::ledger::BalanceView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Withdrawal request; `amount == 0` withdraws everything
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub account: String,
    pub chain_id: u64,
    #[serde(default)]
    pub amount: Credits,
    pub proof: OwnershipProof,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertResponse {
    pub balance: BalanceView,
    pub net_evolution: i128,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    pub account: String,
    pub chain_id: u64,
    pub game: GameType,
    pub wager: Credits,
    pub wanted_outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_secret: Option<String>,
    pub proof: OwnershipProof,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetResponse {
    pub game: String,
    pub outcome: String,
    pub amount_won: Credits,
    pub updated_balance: BalanceView,
    pub fairness: FairnessProof,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitmentResponse {
    pub hashed_secret: String,
    pub expires_in_secs: u64,
}
