//! Chipsettle - provably-fair settlement daemon
//!
//! Watches a casino contract for order events, answers each order with
//! commit-reveal randomness, submits the settlement transaction exactly once
//! and keeps an off-chain credit ledger consistent with on-chain purchases.

pub mod api;
pub mod chain;
pub mod common;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod fairness;
pub mod game_store;
pub mod games;
pub mod ledger;
pub mod metrics;
pub mod secrets;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use api::CasinoApi;
pub use chain::{ContractClient, EventFilter, MeteredContract, MockContract};
pub use config::SettlerConfig;
pub use daemon::Daemon;
pub use errors::{SettleError, SettleResult};
pub use fairness::{FairnessProof, RandomnessResolver};
pub use ledger::AccountLedger;
pub use secrets::SecretCommitmentStore;
pub use storage::{MemoryRepository, RocksRepository};
pub use sync::EventSyncer;
pub use watcher::{OrderWatcher, WatcherHandle, WatcherPhase};
