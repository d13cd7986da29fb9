//! Shared chain-height source
//!
//! One task polls the latest block and publishes it on a `watch` channel.
//! Every syncer subscribes to the same receiver, so ticks that arrive while a
//! cycle is still running coalesce into the newest height.

use crate::chain::ContractClient;
use crate::metrics::SettlerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HeightWatcher {
    receiver: watch::Receiver<u64>,
    handle: JoinHandle<()>,
}

impl HeightWatcher {
    /// Start polling; `initial` is published until the first successful poll.
    pub fn spawn(
        client: Arc<dyn ContractClient>,
        initial: u64,
        poll_interval: Duration,
        cancel: CancellationToken,
        metrics: Arc<SettlerMetrics>,
    ) -> Self {
        let (sender, receiver) = watch::channel(initial);
        let handle = tokio::spawn(run_height_task(
            client,
            sender,
            poll_interval,
            cancel,
            metrics,
        ));
        Self { receiver, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.receiver.clone()
    }

    pub fn latest(&self) -> u64 {
        *self.receiver.borrow()
    }

    pub fn into_handle(self) -> JoinHandle<()> {
        self.handle
    }
}

async fn run_height_task(
    client: Arc<dyn ContractClient>,
    sender: watch::Sender<u64>,
    poll_interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<SettlerMetrics>,
) {
    info!(contract = client.address(), "starting height poller");

    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(contract = client.address(), "height poller cancelled");
                break;
            }
            _ = interval.tick() => {
                match client.latest_block().await {
                    Ok(height) => {
                        metrics.latest_chain_height.set(height as i64);
                        let advanced = sender.send_if_modified(|current| {
                            if height > *current {
                                *current = height;
                                true
                            } else {
                                false
                            }
                        });
                        if advanced {
                            debug!(height, "new chain height");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to poll chain height"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockContract;

    #[tokio::test(start_paused = true)]
    async fn test_publishes_new_heights() {
        let mock = MockContract::new("0xabc", 10);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(SettlerMetrics::unregistered().unwrap());
        let watcher = HeightWatcher::spawn(
            Arc::new(mock.clone()),
            0,
            Duration::from_secs(1),
            cancel.clone(),
            metrics,
        );

        let mut rx = watcher.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 10);

        mock.mine_blocks(5);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 15);

        cancel.cancel();
        watcher.into_handle().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_height_never_goes_backwards() {
        let mock = MockContract::new("0xabc", 10);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(SettlerMetrics::unregistered().unwrap());
        let watcher = HeightWatcher::spawn(
            Arc::new(mock),
            50,
            Duration::from_secs(1),
            cancel.clone(),
            metrics,
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(watcher.latest(), 50);

        cancel.cancel();
        watcher.into_handle().await.unwrap();
    }
}
