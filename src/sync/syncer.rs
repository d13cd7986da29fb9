//! Checkpointed event mirror for one (contract, event type) stream

use super::window::block_windows;
use crate::chain::{ContractClient, EventFilter};
use crate::common::traits::{CheckpointRepository, EventStore};
use crate::common::types::{stream_name, ChainEvent, EventKind, SyncCheckpoint};
use crate::errors::{ConsistencyError, SettleResult};
use crate::metrics::SettlerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one sync cycle
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub windows: usize,
    pub inserted: usize,
    pub block_sync: Option<u64>,
}

pub struct EventSyncer {
    client: Arc<dyn ContractClient>,
    checkpoints: Arc<dyn CheckpointRepository>,
    events: Arc<dyn EventStore>,
    kind: EventKind,
    event_name: String,
    max_block_range: u64,
    window_pause: Option<Duration>,
    publisher: broadcast::Sender<ChainEvent>,
    publish_after: Option<u64>,
    metrics: Arc<SettlerMetrics>,
}

impl EventSyncer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ContractClient>,
        checkpoints: Arc<dyn CheckpointRepository>,
        events: Arc<dyn EventStore>,
        kind: EventKind,
        max_block_range: u64,
        window_pause: Option<Duration>,
        publisher: broadcast::Sender<ChainEvent>,
        metrics: Arc<SettlerMetrics>,
    ) -> Self {
        let event_name = stream_name(client.address(), &kind);
        Self {
            client,
            checkpoints,
            events,
            kind,
            event_name,
            max_block_range,
            window_pause,
            publisher,
            publish_after: None,
            metrics,
        }
    }

    /// Publish only events mined after `block`; older ones are still mirrored.
    pub fn publish_after(mut self, block: u64) -> Self {
        self.publish_after = Some(block);
        self
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Fetch or create the checkpoint, checking it against the live genesis block.
    pub async fn boot(&self) -> SettleResult<SyncCheckpoint> {
        let genesis = self.client.genesis_block().await?;

        let checkpoint = match self.checkpoints.load_checkpoint(&self.event_name).await? {
            Some(stored) if stored.block_created != genesis => {
                return Err(ConsistencyError::GenesisMismatch {
                    event_name: self.event_name.clone(),
                    stored: stored.block_created,
                    live: genesis,
                }
                .into());
            }
            Some(stored) => stored,
            None => {
                let fresh = SyncCheckpoint::at_genesis(self.event_name.clone(), genesis);
                self.checkpoints.save_checkpoint(&fresh).await?;
                info!(event = %self.event_name, genesis, "created sync checkpoint");
                fresh
            }
        };

        self.metrics
            .last_synced_block
            .with_label_values(&[&self.event_name])
            .set(checkpoint.block_sync.map_or(-1, |block| block as i64));
        Ok(checkpoint)
    }

    /// Mirror every block from `checkpoint.next_block()` through `height`.
    ///
    /// Windows run strictly in order and the checkpoint advances after each
    /// one; the first failing window aborts the cycle with the checkpoint left
    /// at the last success.
    pub async fn sync_to(
        &self,
        checkpoint: &mut SyncCheckpoint,
        height: u64,
        cancel: &CancellationToken,
    ) -> SettleResult<CycleReport> {
        let mut report = CycleReport {
            block_sync: checkpoint.block_sync,
            ..Default::default()
        };
        let start = checkpoint.next_block();
        if height < start {
            return Ok(report);
        }

        let mut first = true;
        for (from, to) in block_windows(start, height, self.max_block_range) {
            if cancel.is_cancelled() {
                debug!(event = %self.event_name, "stop requested, leaving remaining windows");
                break;
            }
            if let (false, Some(pause)) = (first, self.window_pause) {
                tokio::time::sleep(pause).await;
            }
            first = false;

            let inserted = match self.sync_window(from, to).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    self.metrics
                        .sync_window_failures
                        .with_label_values(&[&self.event_name])
                        .inc();
                    warn!(event = %self.event_name, from, to, error = %e, "window sync failed");
                    return Err(e);
                }
            };

            let mut advanced = checkpoint.clone();
            advanced.block_sync = Some(to);
            self.checkpoints.save_checkpoint(&advanced).await?;
            *checkpoint = advanced;

            self.metrics
                .last_synced_block
                .with_label_values(&[&self.event_name])
                .set(to as i64);

            report.windows += 1;
            report.inserted += inserted.len();
            report.block_sync = Some(to);

            for event in inserted {
                if self.publish_after.is_some_and(|floor| event.block_number <= floor) {
                    continue;
                }
                // No subscribers is fine; the mirror is the source of truth.
                let _ = self.publisher.send(event);
            }
        }

        if report.inserted > 0 {
            info!(
                event = %self.event_name,
                inserted = report.inserted,
                block_sync = ?report.block_sync,
                "mirrored new events"
            );
        }
        Ok(report)
    }

    async fn sync_window(&self, from: u64, to: u64) -> SettleResult<Vec<ChainEvent>> {
        let filter = EventFilter::range(self.kind.clone(), from, to);
        let fetched = self.client.query_events(&filter).await?;
        let inserted = self.events.insert_events(&fetched).await?;

        self.metrics
            .mirrored_events
            .with_label_values(&[&self.event_name])
            .inc_by(inserted.len() as u64);
        debug!(
            event = %self.event_name,
            from,
            to,
            fetched = fetched.len(),
            inserted = inserted.len(),
            "synced window"
        );
        Ok(inserted)
    }

    /// Boot, then follow the shared height until cancelled.
    ///
    /// Only a boot failure ends the task with an error; cycle failures are
    /// logged and retried from the checkpoint on the next height change.
    pub async fn run(
        self,
        mut height: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> SettleResult<()> {
        let mut checkpoint = self.boot().await?;
        info!(event = %self.event_name, block_sync = ?checkpoint.block_sync, "event syncer started");

        loop {
            let target = *height.borrow_and_update();
            if let Err(e) = self.sync_to(&mut checkpoint, target, &cancel).await {
                e.log(&self.event_name);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = height.changed() => {
                    if changed.is_err() {
                        warn!(event = %self.event_name, "height source closed");
                        break;
                    }
                }
            }
        }

        info!(event = %self.event_name, block_sync = ?checkpoint.block_sync, "event syncer stopped");
        Ok(())
    }
}
