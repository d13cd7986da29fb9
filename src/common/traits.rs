//! Repository traits between the services and durable storage
//!
//! Services only see these traits; `storage::RocksRepository` is the durable
//! implementation and `storage::MemoryRepository` backs unit tests.

use crate::common::types::{AccountBalance, AccountKey, ChainEvent, SyncCheckpoint};
use crate::errors::SettleResult;
use crate::game_store::BetRecord;
use async_trait::async_trait;

/// Per-stream sync checkpoints
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn load_checkpoint(&self, event_name: &str) -> SettleResult<Option<SyncCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SettleResult<()>;
}

/// Local mirror of contract event history
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert events whose identity is not stored yet; returns the ones inserted.
    async fn insert_events(&self, events: &[ChainEvent]) -> SettleResult<Vec<ChainEvent>>;

    /// Events of one stream within an inclusive block range, in block order.
    async fn events_in_range(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> SettleResult<Vec<ChainEvent>>;
}

/// Off-chain credit rows and the bet audit trail
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn load_balance(&self, key: &AccountKey) -> SettleResult<Option<AccountBalance>>;

    async fn save_balance(&self, balance: &AccountBalance) -> SettleResult<()>;

    /// Persist the post-bet balance and append its audit row in one write.
    async fn commit_bet(&self, balance: &AccountBalance, bet: &BetRecord) -> SettleResult<()>;

    /// Most recent bets of one account, newest first.
    async fn recent_bets(&self, key: &AccountKey, limit: usize) -> SettleResult<Vec<BetRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{EventKind, EventPayload};
    use crate::storage::MemoryRepository;

    fn event(block_number: u64, log_index: u32) -> ChainEvent {
        ChainEvent {
            contract: "0xabc".to_string(),
            kind: EventKind::OrderRequested,
            block_number,
            tx_hash: format!("0x{}", block_number),
            log_index,
            payload: EventPayload::Raw {
                data: String::new(),
            },
        }
    }

    async fn exercise_event_store(store: &dyn EventStore) {
        let first = store
            .insert_events(&[event(1, 0), event(2, 0)])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = store
            .insert_events(&[event(2, 0), event(2, 1)])
            .await
            .unwrap();
        assert_eq!(second, vec![event(2, 1)]);

        let stored = store
            .events_in_range("0xabc:OrderRequested", 2, 2)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_event_store_through_trait_object() {
        let repo = MemoryRepository::new();
        exercise_event_store(&repo).await;
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let repo = MemoryRepository::new();
        let repo: &dyn CheckpointRepository = &repo;

        assert!(repo.load_checkpoint("x").await.unwrap().is_none());
        let checkpoint = SyncCheckpoint::at_genesis("x", 10);
        repo.save_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(repo.load_checkpoint("x").await.unwrap(), Some(checkpoint));
    }
}
