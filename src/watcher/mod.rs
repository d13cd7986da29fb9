//! Order processing watchers
//!
//! One [`OrderWatcher`] per (contract, purpose index) recovers unprocessed
//! orders at boot, then settles live and injected orders one at a time.

pub mod order_watcher;
pub mod state;

pub use order_watcher::{OrderWatcher, WatcherHandle};
pub use state::{NonceTracker, WatcherPhase};
