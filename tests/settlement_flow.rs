//! End-to-end settlement through the daemon against the in-memory chain and
//! a RocksDB ledger that survives restarts.

use chipsettle::common::traits::CheckpointRepository;
use chipsettle::common::types::{stream_name, EventKind, SettlementCall};
use chipsettle::config::{SettlerConfig, WatcherConfig};
use chipsettle::errors::{InfraError, UserError};
use chipsettle::{Daemon, MockContract, RocksRepository, SettleError, WatcherPhase};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

const CONTRACT: &str = "0xcasino";

fn config(dir: &TempDir) -> SettlerConfig {
    let mut config = SettlerConfig::development();
    config.chain.contract_address = CONTRACT.to_string();
    config.storage.data_directory = dir.path().to_string_lossy().into_owned();
    config.storage.clear_on_start = false;
    config.sync.poll_interval_ms = 10;
    config.sync.max_block_range = 4;
    config.watchers = vec![WatcherConfig {
        purpose_index: 0,
        mode: Default::default(),
    }];
    config
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

fn settled_nonces(mock: &MockContract) -> Vec<u64> {
    let mut nonces: Vec<u64> = mock.settlements().iter().map(SettlementCall::nonce).collect();
    nonces.sort_unstable();
    nonces
}

#[tokio::test]
async fn test_restart_settles_only_unprocessed_orders() {
    let dir = TempDir::new().unwrap();
    let mock = MockContract::new(CONTRACT, 1);
    for nonce in 0..5 {
        mock.place_order(0, nonce, None, None);
        mock.mine_blocks(3);
    }
    mock.mark_processed(0, 0);
    mock.mark_processed(0, 2);

    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config(&dir), mock.clone(), repo.clone()).await.unwrap();
    daemon.wait_until_live().await;
    wait_for("three settlements", || mock.settlements().len() == 3).await;
    assert_eq!(settled_nonces(&mock), vec![1, 3, 4]);

    let requested = stream_name(CONTRACT, &EventKind::OrderRequested);
    let height = mock.height();
    let deadline = Instant::now() + Duration::from_secs(10);
    while synced_block(&repo, &requested).await < height {
        assert!(Instant::now() < deadline, "timed out waiting for the order stream");
        sleep(Duration::from_millis(10)).await;
    }

    daemon.shutdown().await.unwrap();
    let synced_before = synced_block(&repo, &requested).await;
    drop(repo);

    // Same chain, same database: nothing left to settle
    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config(&dir), mock.clone(), repo.clone()).await.unwrap();
    daemon.wait_until_live().await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(settled_nonces(&mock), vec![1, 3, 4]);
    assert!(synced_block(&repo, &requested).await >= synced_before);
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_injected_and_live_copies_settle_once() {
    let dir = TempDir::new().unwrap();
    let mock = MockContract::new(CONTRACT, 1);
    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config(&dir), mock.clone(), repo).await.unwrap();
    daemon.wait_until_live().await;

    let receipt = mock.place_order(0, 0, Some("0xfeed"), None);
    let other_purpose = mock.place_order(7, 0, None, None);

    let handle = &daemon.watchers()[0];
    assert_eq!(handle.inject_receipt(&receipt).await.unwrap(), 1);
    assert_eq!(handle.inject_receipt(&other_purpose).await.unwrap(), 0);

    wait_for("the settlement", || !mock.settlements().is_empty()).await;
    // Give the live copy time to arrive and be skipped
    sleep(Duration::from_millis(200)).await;
    assert_eq!(settled_nonces(&mock), vec![0]);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_paused_contract_defers_to_restart() {
    let dir = TempDir::new().unwrap();
    let mock = MockContract::new(CONTRACT, 1);
    mock.set_paused(true);

    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config(&dir), mock.clone(), repo.clone()).await.unwrap();
    daemon.wait_until_live().await;
    mock.place_order(0, 0, None, None);
    sleep(Duration::from_millis(200)).await;
    assert!(mock.settlements().is_empty());
    daemon.shutdown().await.unwrap();
    drop(repo);

    mock.set_paused(false);
    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config(&dir), mock.clone(), repo).await.unwrap();
    daemon.wait_until_live().await;
    wait_for("deferred settlement", || mock.settlements().len() == 1).await;
    assert_eq!(daemon.watchers()[0].phase(), WatcherPhase::Live);
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_overflowing_live_feed_misses_no_order() {
    let dir = TempDir::new().unwrap();
    let mock = MockContract::new(CONTRACT, 1);
    for nonce in 0..20 {
        mock.place_order(0, nonce, None, None);
    }

    let mut config = config(&dir);
    config.sync.event_channel_capacity = 4;
    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config, mock.clone(), repo).await.unwrap();

    // One order right after start, then a burst while the backlog settles
    mock.place_order(0, 20, None, None);
    daemon.wait_until_live().await;
    for nonce in 21..30 {
        mock.place_order(0, nonce, None, None);
    }

    wait_for("all thirty settlements", || mock.settlements().len() >= 30).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(settled_nonces(&mock), (0..30).collect::<Vec<_>>());
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unconfirmed_withdrawal_is_paid_once() {
    let dir = TempDir::new().unwrap();
    let mock = MockContract::new(CONTRACT, 1);
    mock.set_totals("0xuser", 7, 0);

    let mut config = config(&dir);
    config.rpc.timeout_ms = 50;
    config.rpc.confirmation_timeout_ms = 100;
    config.ledger.min_plays_before_withdraw = 0;
    let repo = Arc::new(RocksRepository::open(dir.path(), false).unwrap());
    let daemon = Daemon::start(config, mock.clone(), repo).await.unwrap();
    let ledger = daemon.ledger();
    ledger.interrogate_balance("0xuser").await.unwrap();

    // Mined, but the receipt arrives after the confirmation bound
    mock.set_confirmation_delay(Duration::from_millis(300));
    let first = ledger.withdraw("0xuser", 0).await;
    assert!(matches!(first, Err(SettleError::Infra(InfraError::Unconfirmed { .. }))));

    let second = ledger.withdraw("0xuser", 0).await;
    assert!(matches!(second, Err(SettleError::User(UserError::NothingToWithdraw))));
    assert_eq!(mock.payouts(), vec![("0xuser".to_string(), 7)]);

    let stored = ledger.balance("0xuser").await.unwrap();
    assert_eq!((stored.withdrawable, stored.pending_payout), (0, 0));
    daemon.shutdown().await.unwrap();
}

async fn synced_block(repo: &RocksRepository, stream: &str) -> u64 {
    repo.load_checkpoint(stream)
        .await
        .unwrap()
        .and_then(|cp| cp.block_sync)
        .unwrap_or(0)
}
