//! Optimized storage layer using RocksDB

use crate::common::traits::{BalanceRepository, CheckpointRepository, EventStore};
use crate::common::types::{AccountBalance, AccountKey, ChainEvent, SyncCheckpoint};
use crate::errors::{InfraError, SettleResult};
use crate::game_store::{self, BetRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

const CHECKPOINT_PREFIX: &str = "checkpoint:";
const EVENT_PREFIX: &str = "event:";

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Remove all data at `path` before opening (testing only!)
    pub fn open_fresh<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        DB::destroy(&Options::default(), path.as_ref())?;
        Self::new(path)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, rocksdb::Error> {
        self.db.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.put(key, value)
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), rocksdb::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)
    }

    /// Forward scan of keys under `prefix`, starting at `start` (or the prefix itself).
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        start: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, rocksdb::Error> {
        let from = start.unwrap_or(prefix);
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(from, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

fn checkpoint_key(event_name: &str) -> Vec<u8> {
    format!("{}{}", CHECKPOINT_PREFIX, event_name).into_bytes()
}

fn event_stream_prefix(event_name: &str) -> Vec<u8> {
    format!("{}{}:", EVENT_PREFIX, event_name).into_bytes()
}

/// Key layout: prefix | block(be) | log_index(be) | tx_hash
fn event_key(event: &ChainEvent) -> Vec<u8> {
    let mut key = event_stream_prefix(&event.stream_name());
    key.extend_from_slice(&event.block_number.to_be_bytes());
    key.extend_from_slice(&event.log_index.to_be_bytes());
    key.extend_from_slice(event.tx_hash.to_lowercase().as_bytes());
    key
}

fn block_of_event_key(prefix_len: usize, key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(prefix_len..prefix_len + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Durable repositories over a single RocksDB instance
#[derive(Clone)]
pub struct RocksRepository {
    storage: OptimizedStorage,
}

impl RocksRepository {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self { storage }
    }

    pub fn open<P: AsRef<Path>>(path: P, clear_on_start: bool) -> SettleResult<Self> {
        let storage = if clear_on_start {
            tracing::warn!(path = %path.as_ref().display(), "clearing settlement database on start");
            OptimizedStorage::open_fresh(path)?
        } else {
            OptimizedStorage::new(path)?
        };
        Ok(Self::new(storage))
    }

    pub fn storage(&self) -> &OptimizedStorage {
        &self.storage
    }
}

#[async_trait]
impl CheckpointRepository for RocksRepository {
    async fn load_checkpoint(&self, event_name: &str) -> SettleResult<Option<SyncCheckpoint>> {
        match self.storage.get(&checkpoint_key(event_name))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SettleResult<()> {
        let bytes = bincode::serialize(checkpoint)?;
        self.storage
            .put(&checkpoint_key(&checkpoint.event_name), &bytes)?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for RocksRepository {
    async fn insert_events(&self, events: &[ChainEvent]) -> SettleResult<Vec<ChainEvent>> {
        let mut batch = WriteBatch::default();
        let mut inserted = Vec::new();
        let mut pending = std::collections::HashSet::new();

        for event in events {
            let key = event_key(event);
            if self.storage.get(&key)?.is_some() || !pending.insert(key.clone()) {
                continue;
            }
            batch.put(&key, serde_json::to_vec(event)?);
            inserted.push(event.clone());
        }

        if !inserted.is_empty() {
            self.storage.db.write(batch)?;
        }
        Ok(inserted)
    }

    async fn events_in_range(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> SettleResult<Vec<ChainEvent>> {
        let prefix = event_stream_prefix(event_name);
        let mut start = prefix.clone();
        start.extend_from_slice(&from_block.to_be_bytes());

        let mut events = Vec::new();
        for item in self
            .storage
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            match block_of_event_key(prefix.len(), &key) {
                Some(block) if block <= to_block => {
                    events.push(serde_json::from_slice::<ChainEvent>(&value)?)
                }
                Some(_) => break,
                None => {
                    return Err(InfraError::Storage(format!(
                        "Malformed event key under {}",
                        event_name
                    ))
                    .into())
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl BalanceRepository for RocksRepository {
    async fn load_balance(&self, key: &AccountKey) -> SettleResult<Option<AccountBalance>> {
        match self.storage.get(&game_store::balance_key(key))? {
            Some(bytes) => Ok(Some(game_store::decode_balance(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_balance(&self, balance: &AccountBalance) -> SettleResult<()> {
        let bytes = game_store::encode_balance(balance)?;
        self.storage
            .put(&game_store::balance_key(&balance.key()), &bytes)?;
        Ok(())
    }

    async fn commit_bet(&self, balance: &AccountBalance, bet: &BetRecord) -> SettleResult<()> {
        let items = game_store::bet_commit_items(balance, bet)?;
        self.storage.batch_write(&items)?;
        Ok(())
    }

    async fn recent_bets(&self, key: &AccountKey, limit: usize) -> SettleResult<Vec<BetRecord>> {
        let rows = self
            .storage
            .scan_prefix(&game_store::bet_prefix(key), None, limit)?;
        rows.iter()
            .map(|(_, value)| game_store::decode_bet(value))
            .collect()
    }
}

/// In-memory repositories with the same semantics as [`RocksRepository`]
#[derive(Default)]
pub struct MemoryRepository {
    checkpoints: DashMap<String, SyncCheckpoint>,
    events: Mutex<BTreeMap<Vec<u8>, ChainEvent>>,
    balances: DashMap<AccountKey, AccountBalance>,
    bets: Mutex<BTreeMap<Vec<u8>, BetRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointRepository for MemoryRepository {
    async fn load_checkpoint(&self, event_name: &str) -> SettleResult<Option<SyncCheckpoint>> {
        Ok(self.checkpoints.get(event_name).map(|c| c.clone()))
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SettleResult<()> {
        self.checkpoints
            .insert(checkpoint.event_name.clone(), checkpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryRepository {
    async fn insert_events(&self, events: &[ChainEvent]) -> SettleResult<Vec<ChainEvent>> {
        let mut stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inserted = Vec::new();
        for event in events {
            let key = event_key(event);
            if stored.contains_key(&key) {
                continue;
            }
            stored.insert(key, event.clone());
            inserted.push(event.clone());
        }
        Ok(inserted)
    }

    async fn events_in_range(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> SettleResult<Vec<ChainEvent>> {
        let prefix = event_stream_prefix(event_name);
        let stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, event)| event.block_number >= from_block && event.block_number <= to_block)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

#[async_trait]
impl BalanceRepository for MemoryRepository {
    async fn load_balance(&self, key: &AccountKey) -> SettleResult<Option<AccountBalance>> {
        Ok(self.balances.get(key).map(|b| b.clone()))
    }

    async fn save_balance(&self, balance: &AccountBalance) -> SettleResult<()> {
        self.balances.insert(balance.key(), balance.clone());
        Ok(())
    }

    async fn commit_bet(&self, balance: &AccountBalance, bet: &BetRecord) -> SettleResult<()> {
        let mut bets = self.bets.lock().unwrap_or_else(PoisonError::into_inner);
        bets.insert(game_store::bet_key(&bet.account, bet.sequence), bet.clone());
        self.balances.insert(balance.key(), balance.clone());
        Ok(())
    }

    async fn recent_bets(&self, key: &AccountKey, limit: usize) -> SettleResult<Vec<BetRecord>> {
        let prefix = game_store::bet_prefix(key);
        let bets = self.bets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(bets
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .take(limit)
            .map(|(_, bet)| bet.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{EventKind, EventPayload};
    use crate::fairness;
    use tempfile::TempDir;

    fn repo() -> (TempDir, RocksRepository) {
        let dir = TempDir::new().unwrap();
        let repo = RocksRepository::open(dir.path(), false).unwrap();
        (dir, repo)
    }

    fn order(block_number: u64, nonce: u64) -> ChainEvent {
        ChainEvent {
            contract: "0xabc".to_string(),
            kind: EventKind::OrderRequested,
            block_number,
            tx_hash: format!("0x{:x}", nonce),
            log_index: 0,
            payload: EventPayload::OrderRequested {
                purpose_index: 0,
                nonce,
                client_seed: None,
                hashed_secret: None,
            },
        }
    }

    fn bet(account: &AccountKey, sequence: u64) -> BetRecord {
        BetRecord {
            account: account.clone(),
            sequence,
            game: "coinflip".to_string(),
            wager: 3,
            wanted_outcome: "heads".to_string(),
            outcome_value: "tails".to_string(),
            amount_won: 0,
            fairness: fairness::prove(&[0u8; 32], sequence, &[1u8; 32], true),
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_checkpoint_persists() {
        let (_dir, repo) = repo();
        let mut checkpoint = SyncCheckpoint::at_genesis("0xabc:OrderRequested", 100);
        repo.save_checkpoint(&checkpoint).await.unwrap();

        checkpoint.block_sync = Some(150);
        repo.save_checkpoint(&checkpoint).await.unwrap();

        let loaded = repo
            .load_checkpoint("0xabc:OrderRequested")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.block_sync, Some(150));
        assert_eq!(loaded.block_created, 100);
    }

    #[tokio::test]
    async fn test_event_insert_is_duplicate_safe() {
        let (_dir, repo) = repo();
        let inserted = repo
            .insert_events(&[order(5, 0), order(5, 0), order(7, 1)])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 2);

        let again = repo.insert_events(&[order(7, 1)]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_events_in_range() {
        let (_dir, repo) = repo();
        repo.insert_events(&[order(5, 0), order(300, 1), order(70_000, 2)])
            .await
            .unwrap();

        let stream = "0xabc:OrderRequested";
        assert_eq!(repo.events_in_range(stream, 0, 299).await.unwrap().len(), 1);
        assert_eq!(repo.events_in_range(stream, 5, 70_000).await.unwrap().len(), 3);
        assert!(repo
            .events_in_range("0xabc:OrderProcessed", 0, u64::MAX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_commit_bet_and_recent() {
        let (_dir, repo) = repo();
        let account = AccountKey::new(1, "0xabc");
        let mut balance = AccountBalance::empty(&account);

        for sequence in 0..3 {
            balance.total_plays = sequence + 1;
            repo.commit_bet(&balance, &bet(&account, sequence)).await.unwrap();
        }

        let loaded = repo.load_balance(&account).await.unwrap().unwrap();
        assert_eq!(loaded.total_plays, 3);

        let recent = repo.recent_bets(&account, 2).await.unwrap();
        assert_eq!(
            recent.iter().map(|b| b.sequence).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let account = AccountKey::new(1, "0xabc");
        {
            let repo = RocksRepository::open(dir.path(), false).unwrap();
            let mut balance = AccountBalance::empty(&account);
            balance.withdrawable = 9;
            repo.save_balance(&balance).await.unwrap();
        }

        let repo = RocksRepository::open(dir.path(), false).unwrap();
        assert_eq!(
            repo.load_balance(&account).await.unwrap().unwrap().withdrawable,
            9
        );
    }

    #[tokio::test]
    async fn test_memory_repository_matches_rocks_ordering() {
        let memory = MemoryRepository::new();
        let account = AccountKey::new(1, "0xabc");
        let balance = AccountBalance::empty(&account);
        for sequence in 0..3 {
            memory.commit_bet(&balance, &bet(&account, sequence)).await.unwrap();
        }
        let recent = memory.recent_bets(&account, 5).await.unwrap();
        assert_eq!(recent.first().map(|b| b.sequence), Some(2));
    }
}
