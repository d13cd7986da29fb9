//! Per-account async locks

use crate::common::types::AccountKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by `(chain_id, address)`.
///
/// Guards are owned, so they can be held across awaits and are released on
/// every exit path when dropped.
#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<AccountKey, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &AccountKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_same_account_is_serialized() {
        let locks = Arc::new(AccountLocks::new());
        let key = AccountKey::new(1, "0xabc");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let (locks, key, inside, max_inside) =
                (locks.clone(), key.clone(), inside.clone(), max_inside.clone());
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.lock(&AccountKey::new(1, "0xa")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&AccountKey::new(1, "0xb")),
        )
        .await;
        assert!(b.is_ok());

        let same_address_other_chain = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&AccountKey::new(2, "0xa")),
        )
        .await;
        assert!(same_address_other_chain.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = AccountLocks::new();
        let held = locks.lock(&AccountKey::new(1, "0xa")).await;
        drop(locks.lock(&AccountKey::new(1, "0xb")).await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
