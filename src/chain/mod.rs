//! Contract collaborator boundary
//!
//! Everything the daemon needs from the chain goes through [`ContractClient`].
//! Production deployments wrap their binding in [`MeteredContract`]; tests and
//! dry runs use the in-memory [`MockContract`].

pub mod metered;
pub mod mock;

pub use metered::MeteredContract;
pub use mock::MockContract;

use crate::common::types::{
    ChainEvent, Credits, EventKind, Nonce, OnChainTotals, PurposeIndex, SettlementCall, TxReceipt,
};
use crate::errors::SettleResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Event query over an inclusive block range
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub purpose_index: Option<PurposeIndex>,
    pub nonce: Option<Nonce>,
    pub from_block: u64,
    pub to_block: u64,
}

impl EventFilter {
    pub fn range(kind: EventKind, from_block: u64, to_block: u64) -> Self {
        Self {
            kind,
            purpose_index: None,
            nonce: None,
            from_block,
            to_block,
        }
    }

    pub fn purpose(mut self, purpose_index: PurposeIndex) -> Self {
        self.purpose_index = Some(purpose_index);
        self
    }

    pub fn nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Whether an event satisfies every constraint of this filter.
    pub fn matches(&self, event: &ChainEvent) -> bool {
        if event.kind != self.kind
            || event.block_number < self.from_block
            || event.block_number > self.to_block
        {
            return false;
        }

        let key = event
            .as_order()
            .map(|o| (o.purpose_index, o.nonce))
            .or_else(|| event.processed_nonce());

        match key {
            Some((purpose, nonce)) => {
                self.purpose_index.map_or(true, |p| p == purpose)
                    && self.nonce.map_or(true, |n| n == nonce)
            }
            None => self.purpose_index.is_none() && self.nonce.is_none(),
        }
    }
}

/// Read and write access to one deployed contract
///
/// Queries over a block range are not chunked by the implementation; callers
/// keep ranges within the host's limit.
#[async_trait]
pub trait ContractClient: Send + Sync {
    /// Lowercase contract address
    fn address(&self) -> &str;

    /// Block the contract was deployed in
    async fn genesis_block(&self) -> SettleResult<u64>;

    async fn latest_block(&self) -> SettleResult<u64>;

    async fn is_paused(&self) -> SettleResult<bool>;

    /// Purchased, airdropped and paid-out totals recorded on chain for an account
    async fn account_totals(&self, address: &str) -> SettleResult<OnChainTotals>;

    /// Whether the paying contract currently holds enough to cover `amount`
    async fn can_pay(&self, amount: Credits) -> SettleResult<bool>;

    async fn query_events(&self, filter: &EventFilter) -> SettleResult<Vec<ChainEvent>>;

    /// Submit a settlement and wait for its receipt
    ///
    /// An error after broadcast leaves the outcome unknown to the caller.
    async fn submit_settlement(&self, call: &SettlementCall) -> SettleResult<TxReceipt>;

    /// Pay `amount` out to `address` and wait for the receipt
    async fn submit_payout(&self, address: &str, amount: Credits) -> SettleResult<TxReceipt>;
}
