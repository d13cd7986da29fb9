//! Append-only bet audit rows stored in RocksDB.

use crate::common::types::{AccountBalance, AccountKey, Credits};
use crate::errors::{InfraError, SettleResult};
use crate::fairness::FairnessProof;
use serde::{Deserialize, Serialize};

const BALANCE_PREFIX: &str = "balance:";
const BET_PREFIX: &str = "bet:";

/// One settled off-chain bet, never mutated after insert
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetRecord {
    pub account: AccountKey,
    /// The account's `total_plays` before this bet; also the fairness nonce
    pub sequence: u64,
    pub game: String,
    pub wager: Credits,
    pub wanted_outcome: String,
    pub outcome_value: String,
    pub amount_won: Credits,
    pub fairness: FairnessProof,
    pub timestamp_ms: u64,
}

pub fn balance_key(key: &AccountKey) -> Vec<u8> {
    format!("{}{}:{}", BALANCE_PREFIX, key.chain_id, key.address).into_bytes()
}

pub fn bet_prefix(key: &AccountKey) -> Vec<u8> {
    format!("{}{}:{}:", BET_PREFIX, key.chain_id, key.address).into_bytes()
}

pub fn bet_key(key: &AccountKey, sequence: u64) -> Vec<u8> {
    // Newest-first on a forward scan: prefix | inv_sequence(be)
    let mut out = bet_prefix(key);
    out.extend_from_slice(&(u64::MAX - sequence).to_be_bytes());
    out
}

pub fn encode_balance(balance: &AccountBalance) -> SettleResult<Vec<u8>> {
    serde_json::to_vec(balance).map_err(|e| {
        InfraError::Encoding(format!(
            "Failed to encode balance for {}: {}",
            balance.key(),
            e
        ))
        .into()
    })
}

pub fn decode_balance(bytes: &[u8]) -> SettleResult<AccountBalance> {
    serde_json::from_slice(bytes)
        .map_err(|e| InfraError::Storage(format!("Corrupted balance row: {}", e)).into())
}

pub fn encode_bet(bet: &BetRecord) -> SettleResult<Vec<u8>> {
    serde_json::to_vec(bet).map_err(|e| {
        InfraError::Encoding(format!(
            "Failed to encode bet {} for {}: {}",
            bet.sequence, bet.account, e
        ))
        .into()
    })
}

pub fn decode_bet(bytes: &[u8]) -> SettleResult<BetRecord> {
    serde_json::from_slice(bytes)
        .map_err(|e| InfraError::Storage(format!("Corrupted bet row: {}", e)).into())
}

/// Rows written together when a bet settles: the balance and its audit entry.
pub fn bet_commit_items(
    balance: &AccountBalance,
    bet: &BetRecord,
) -> SettleResult<Vec<(Vec<u8>, Vec<u8>)>> {
    Ok(vec![
        (balance_key(&balance.key()), encode_balance(balance)?),
        (bet_key(&bet.account, bet.sequence), encode_bet(bet)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_keys_sort_newest_first() {
        let account = AccountKey::new(1, "0xabc");
        let older = bet_key(&account, 1);
        let newer = bet_key(&account, 2);
        assert!(newer < older);
        assert!(older.starts_with(&bet_prefix(&account)));
    }

    #[test]
    fn test_bet_prefix_does_not_cover_other_accounts() {
        let a = AccountKey::new(1, "0xab");
        let b = AccountKey::new(1, "0xabc");
        assert!(!bet_key(&b, 0).starts_with(&bet_prefix(&a)));
    }

    #[test]
    fn test_balance_key_layout() {
        let key = AccountKey::new(56, "0xAA");
        assert_eq!(balance_key(&key), b"balance:56:0xaa".to_vec());
    }
}
