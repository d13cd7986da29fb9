//! In-memory chain for tests and dry runs
//!
//! Every write mines exactly one block. Failure injection hooks let tests
//! exercise the retry and recovery paths without a node.

use super::{ContractClient, EventFilter};
use crate::common::types::{
    ChainEvent, Credits, EventKind, EventPayload, Nonce, OnChainTotals, PurposeIndex,
    SettlementCall, TxReceipt,
};
use crate::errors::{InfraError, SettleResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    genesis: u64,
    height: u64,
    paused: bool,
    events: Vec<ChainEvent>,
    totals: HashMap<String, OnChainTotals>,
    treasury: Credits,
    settlements: Vec<SettlementCall>,
    payouts: Vec<(String, Credits)>,
    query_log: Vec<(u64, u64)>,
    failing_blocks: HashMap<u64, u32>,
    failing_settlements: u32,
    reverting_payouts: u32,
    max_block_range: Option<u64>,
    latency: Duration,
    confirmation_delay: Duration,
    tx_counter: u64,
}

#[derive(Clone)]
pub struct MockContract {
    address: String,
    state: Arc<Mutex<MockState>>,
}

impl MockContract {
    /// Contract deployed at `genesis`, which is also the current height.
    pub fn new(address: &str, genesis: u64) -> Self {
        Self {
            address: address.to_lowercase(),
            state: Arc::new(Mutex::new(MockState {
                genesis,
                height: genesis,
                treasury: Credits::MAX,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mine_blocks(&self, count: u64) -> u64 {
        let mut state = self.state();
        state.height += count;
        state.height
    }

    pub fn height(&self) -> u64 {
        self.state().height
    }

    /// Mine one block carrying a single log and return its receipt.
    fn mine_log(&self, kind: EventKind, payload: EventPayload) -> TxReceipt {
        let mut state = self.state();
        state.height += 1;
        state.tx_counter += 1;

        let event = ChainEvent {
            contract: self.address.clone(),
            kind,
            block_number: state.height,
            tx_hash: format!("0x{:064x}", state.tx_counter),
            log_index: 0,
            payload,
        };
        state.events.push(event.clone());

        TxReceipt {
            tx_hash: event.tx_hash.clone(),
            block_number: event.block_number,
            success: true,
            logs: vec![event],
        }
    }

    /// A player places an order; returns the receipt the player's wallet would see.
    pub fn place_order(
        &self,
        purpose_index: PurposeIndex,
        nonce: Nonce,
        client_seed: Option<&str>,
        hashed_secret: Option<&str>,
    ) -> TxReceipt {
        self.mine_log(
            EventKind::OrderRequested,
            EventPayload::OrderRequested {
                purpose_index,
                nonce,
                client_seed: client_seed.map(str::to_string),
                hashed_secret: hashed_secret.map(str::to_string),
            },
        )
    }

    /// Record a settlement made outside this process.
    pub fn mark_processed(&self, purpose_index: PurposeIndex, nonce: Nonce) -> TxReceipt {
        self.mine_log(
            EventKind::OrderProcessed,
            EventPayload::OrderProcessed {
                purpose_index,
                nonce,
                randomness: "00".repeat(32),
            },
        )
    }

    /// Append an event as-is, e.g. to replay a log at an identity already seen.
    pub fn push_raw_event(&self, event: ChainEvent) {
        let mut state = self.state();
        state.height = state.height.max(event.block_number);
        state.events.push(event);
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
    }

    pub fn set_genesis(&self, genesis: u64) {
        self.state().genesis = genesis;
    }

    pub fn set_totals(&self, address: &str, bought: Credits, airdropped: Credits) {
        let mut state = self.state();
        let totals = state.totals.entry(address.to_lowercase()).or_default();
        totals.bought = bought;
        totals.airdropped = airdropped;
    }

    pub fn set_treasury(&self, amount: Credits) {
        self.state().treasury = amount;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Hold every receipt for `delay` after the transaction is already mined.
    pub fn set_confirmation_delay(&self, delay: Duration) {
        self.state().confirmation_delay = delay;
    }

    /// Reject ranges wider than `range`, like a public RPC host does.
    pub fn set_max_block_range(&self, range: u64) {
        self.state().max_block_range = Some(range);
    }

    /// Fail the next `times` event queries whose range covers `block`.
    pub fn fail_queries_covering(&self, block: u64, times: u32) {
        self.state().failing_blocks.insert(block, times);
    }

    pub fn fail_next_settlements(&self, times: u32) {
        self.state().failing_settlements = times;
    }

    /// Revert the next `times` payouts after the treasury check passed.
    pub fn revert_next_payouts(&self, times: u32) {
        self.state().reverting_payouts = times;
    }

    pub fn settlements(&self) -> Vec<SettlementCall> {
        self.state().settlements.clone()
    }

    pub fn payouts(&self) -> Vec<(String, Credits)> {
        self.state().payouts.clone()
    }

    /// Inclusive ranges of every event query served so far.
    pub fn query_log(&self) -> Vec<(u64, u64)> {
        self.state().query_log.clone()
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn confirm(&self, receipt: TxReceipt) -> SettleResult<TxReceipt> {
        let delay = self.state().confirmation_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(receipt)
    }

    fn is_processed(state: &MockState, purpose_index: PurposeIndex, nonce: Nonce) -> bool {
        state
            .events
            .iter()
            .filter_map(ChainEvent::processed_nonce)
            .any(|key| key == (purpose_index, nonce))
    }

    fn is_ordered(state: &MockState, purpose_index: PurposeIndex, nonce: Nonce) -> bool {
        state
            .events
            .iter()
            .filter_map(ChainEvent::as_order)
            .any(|o| o.purpose_index == purpose_index && o.nonce == nonce)
    }
}

fn randomness_of(call: &SettlementCall) -> String {
    match call {
        SettlementCall::Fulfill { randomness, .. }
        | SettlementCall::FulfillThenReveal { randomness, .. }
        | SettlementCall::RevealWithRandomness { randomness, .. } => randomness.clone(),
        SettlementCall::RevealOnChain { secret, .. } => {
            crate::secrets::commitment_hash(&parse_secret(secret))
        }
    }
}

fn parse_secret(secret: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    if let Ok(bytes) = hex::decode(crate::common::types::normalize_hex(secret)) {
        let n = bytes.len().min(32);
        out[..n].copy_from_slice(&bytes[..n]);
    }
    out
}

#[async_trait]
impl ContractClient for MockContract {
    fn address(&self) -> &str {
        &self.address
    }

    async fn genesis_block(&self) -> SettleResult<u64> {
        self.delay().await;
        Ok(self.state().genesis)
    }

    async fn latest_block(&self) -> SettleResult<u64> {
        self.delay().await;
        Ok(self.state().height)
    }

    async fn is_paused(&self) -> SettleResult<bool> {
        self.delay().await;
        Ok(self.state().paused)
    }

    async fn account_totals(&self, address: &str) -> SettleResult<OnChainTotals> {
        self.delay().await;
        Ok(self
            .state()
            .totals
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or_default())
    }

    async fn can_pay(&self, amount: Credits) -> SettleResult<bool> {
        self.delay().await;
        Ok(self.state().treasury >= amount)
    }

    async fn query_events(&self, filter: &EventFilter) -> SettleResult<Vec<ChainEvent>> {
        self.delay().await;
        let mut state = self.state();

        if let Some(max) = state.max_block_range {
            let span = filter.to_block.saturating_sub(filter.from_block) + 1;
            if span > max {
                return Err(InfraError::Rpc {
                    method: "query_events".to_string(),
                    reason: format!("range of {} blocks exceeds {}", span, max),
                }
                .into());
            }
        }

        let failing = state
            .failing_blocks
            .iter_mut()
            .find(|(block, remaining)| {
                **remaining > 0 && **block >= filter.from_block && **block <= filter.to_block
            })
            .map(|(block, remaining)| {
                *remaining -= 1;
                *block
            });
        if let Some(block) = failing {
            return Err(InfraError::Rpc {
                method: "query_events".to_string(),
                reason: format!("injected failure covering block {}", block),
            }
            .into());
        }

        state.query_log.push((filter.from_block, filter.to_block));
        Ok(state
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    async fn submit_settlement(&self, call: &SettlementCall) -> SettleResult<TxReceipt> {
        self.delay().await;
        {
            let mut state = self.state();
            if state.failing_settlements > 0 {
                state.failing_settlements -= 1;
                return Err(InfraError::Rpc {
                    method: "submit_settlement".to_string(),
                    reason: "injected failure".to_string(),
                }
                .into());
            }

            let (purpose_index, nonce) = (call.purpose_index(), call.nonce());
            if Self::is_processed(&state, purpose_index, nonce)
                || !Self::is_ordered(&state, purpose_index, nonce)
            {
                state.tx_counter += 1;
                return Err(InfraError::TransactionReverted {
                    tx_hash: format!("0x{:064x}", state.tx_counter),
                }
                .into());
            }
            state.settlements.push(call.clone());
        }

        let receipt = self.mine_log(
            EventKind::OrderProcessed,
            EventPayload::OrderProcessed {
                purpose_index: call.purpose_index(),
                nonce: call.nonce(),
                randomness: randomness_of(call),
            },
        );
        self.confirm(receipt).await
    }

    async fn submit_payout(&self, address: &str, amount: Credits) -> SettleResult<TxReceipt> {
        self.delay().await;
        {
            let mut state = self.state();
            let forced = state.reverting_payouts > 0;
            if forced {
                state.reverting_payouts -= 1;
            }
            if forced || state.treasury < amount {
                state.tx_counter += 1;
                return Err(InfraError::TransactionReverted {
                    tx_hash: format!("0x{:064x}", state.tx_counter),
                }
                .into());
            }
            state.treasury -= amount;
            state.payouts.push((address.to_lowercase(), amount));
            state
                .totals
                .entry(address.to_lowercase())
                .or_default()
                .withdrawn += amount;
        }

        let receipt = self.mine_log(
            EventKind::Other {
                name: "Payout".to_string(),
            },
            EventPayload::Raw {
                data: format!("{}:{}", address.to_lowercase(), amount),
            },
        );
        self.confirm(receipt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettleError;

    #[tokio::test]
    async fn test_orders_and_settlements() {
        let mock = MockContract::new("0xabc", 10);
        let receipt = mock.place_order(1, 0, None, None);
        assert_eq!(receipt.block_number, 11);
        assert_eq!(receipt.logs.len(), 1);

        let call = SettlementCall::Fulfill {
            purpose_index: 1,
            nonce: 0,
            randomness: "ab".to_string(),
        };
        let settled = mock.submit_settlement(&call).await.unwrap();
        assert!(settled.success);
        assert_eq!(settled.logs[0].processed_nonce(), Some((1, 0)));

        match mock.submit_settlement(&call).await {
            Err(SettleError::Infra(InfraError::TransactionReverted { .. })) => {}
            other => panic!("expected revert, got {:?}", other),
        }
        assert_eq!(mock.settlements().len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_of_unknown_order_reverts() {
        let mock = MockContract::new("0xabc", 10);
        let call = SettlementCall::Fulfill {
            purpose_index: 1,
            nonce: 9,
            randomness: "ab".to_string(),
        };
        assert!(mock.submit_settlement(&call).await.is_err());
    }

    #[tokio::test]
    async fn test_query_failure_injection() {
        let mock = MockContract::new("0xabc", 0);
        mock.place_order(0, 0, None, None);
        mock.fail_queries_covering(1, 1);

        let filter = EventFilter::range(EventKind::OrderRequested, 0, 5);
        assert!(mock.query_events(&filter).await.is_err());
        assert_eq!(mock.query_events(&filter).await.unwrap().len(), 1);
        assert_eq!(mock.query_log(), vec![(0, 5)]);
    }

    #[tokio::test]
    async fn test_max_block_range_enforced() {
        let mock = MockContract::new("0xabc", 0);
        mock.set_max_block_range(10);

        assert!(mock
            .query_events(&EventFilter::range(EventKind::OrderRequested, 0, 9))
            .await
            .is_ok());
        assert!(mock
            .query_events(&EventFilter::range(EventKind::OrderRequested, 0, 10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_payout_respects_treasury() {
        let mock = MockContract::new("0xabc", 0);
        mock.set_treasury(10);

        assert!(mock.can_pay(10).await.unwrap());
        assert!(!mock.can_pay(11).await.unwrap());
        assert!(mock.submit_payout("0xUser", 4).await.is_ok());
        assert!(mock.submit_payout("0xuser", 7).await.is_err());
        assert_eq!(mock.payouts(), vec![("0xuser".to_string(), 4)]);
        assert_eq!(mock.account_totals("0xUSER").await.unwrap().withdrawn, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_delay_after_mining() {
        let mock = MockContract::new("0xabc", 0);
        mock.set_confirmation_delay(Duration::from_secs(30));

        let pending = tokio::spawn({
            let mock = mock.clone();
            async move { mock.submit_payout("0xuser", 3).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.payouts().len(), 1);
        assert!(!pending.is_finished());

        assert!(pending.await.unwrap().unwrap().success);
    }
}
