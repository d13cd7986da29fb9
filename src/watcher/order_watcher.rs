//! Exactly-once settlement of one (contract, purpose index) order stream

use super::state::{NonceTracker, WatcherPhase};
use crate::chain::{ContractClient, EventFilter};
use crate::common::types::{
    ChainEvent, EventKind, OrderRecord, PurposeIndex, SettlementCall, SettlementMode, TxReceipt,
};
use crate::errors::{ConsistencyError, InfraError, SettleError, SettleResult};
use crate::fairness::{FairnessProof, RandomnessResolver};
use crate::metrics::SettlerMetrics;
use crate::sync::block_windows;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the injected-order queue
const INJECTION_CAPACITY: usize = 256;

/// Handle to a running watcher
#[derive(Clone)]
pub struct WatcherHandle {
    contract: String,
    purpose_index: PurposeIndex,
    phase: watch::Receiver<WatcherPhase>,
    injector: mpsc::Sender<OrderRecord>,
    audit: broadcast::Sender<ChainEvent>,
}

impl WatcherHandle {
    pub fn purpose_index(&self) -> PurposeIndex {
        self.purpose_index
    }

    pub fn phase(&self) -> WatcherPhase {
        *self.phase.borrow()
    }

    /// Wait until the watcher reaches `target` (or stops).
    pub async fn wait_for_phase(&self, target: WatcherPhase) -> WatcherPhase {
        let mut phase = self.phase.clone();
        loop {
            let current = *phase.borrow_and_update();
            if current == target || current == WatcherPhase::Stopped {
                return current;
            }
            if phase.changed().await.is_err() {
                return *phase.borrow();
            }
        }
    }

    /// Queue the order requests of a receipt the caller already holds.
    ///
    /// Logs for other contracts or purpose indexes are ignored. Returns the
    /// number of orders queued.
    pub async fn inject_receipt(&self, receipt: &TxReceipt) -> SettleResult<usize> {
        let orders: Vec<OrderRecord> = receipt
            .logs
            .iter()
            .filter(|log| log.kind == EventKind::OrderRequested)
            .filter(|log| log.contract.eq_ignore_ascii_case(&self.contract))
            .filter_map(ChainEvent::as_order)
            .filter(|order| order.purpose_index == self.purpose_index)
            .collect();

        let count = orders.len();
        for order in orders {
            self.injector
                .send(order)
                .await
                .map_err(|_| InfraError::ShuttingDown)?;
        }
        Ok(count)
    }

    /// Contract-native events from settlement receipts, for audit indexing.
    pub fn subscribe_audit(&self) -> broadcast::Receiver<ChainEvent> {
        self.audit.subscribe()
    }
}

pub struct OrderWatcher {
    client: Arc<dyn ContractClient>,
    resolver: RandomnessResolver,
    purpose_index: PurposeIndex,
    mode: SettlementMode,
    max_block_range: u64,
    retry_interval: Duration,
    tracker: NonceTracker,
    /// Highest block whose order requests are known to this watcher
    scanned_to: u64,
    phase: watch::Sender<WatcherPhase>,
    injected: mpsc::Receiver<OrderRecord>,
    audit: broadcast::Sender<ChainEvent>,
    metrics: Arc<SettlerMetrics>,
    label: String,
}

impl OrderWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ContractClient>,
        resolver: RandomnessResolver,
        purpose_index: PurposeIndex,
        mode: SettlementMode,
        max_block_range: u64,
        retry_interval: Duration,
        metrics: Arc<SettlerMetrics>,
    ) -> (Self, WatcherHandle) {
        let (phase_tx, phase_rx) = watch::channel(WatcherPhase::Recovering);
        let (inject_tx, inject_rx) = mpsc::channel(INJECTION_CAPACITY);
        let (audit_tx, _) = broadcast::channel(INJECTION_CAPACITY);

        let handle = WatcherHandle {
            contract: client.address().to_string(),
            purpose_index,
            phase: phase_rx,
            injector: inject_tx,
            audit: audit_tx.clone(),
        };

        let watcher = Self {
            client,
            resolver,
            purpose_index,
            mode,
            max_block_range,
            retry_interval,
            tracker: NonceTracker::default(),
            scanned_to: 0,
            phase: phase_tx,
            injected: inject_rx,
            audit: audit_tx,
            metrics,
            label: purpose_index.to_string(),
        };

        (watcher, handle)
    }

    /// Requests and processed nonces of this purpose index in `[from, to]`.
    async fn scan(&self, from: u64, to: u64) -> SettleResult<(BTreeMap<u64, OrderRecord>, BTreeSet<u64>)> {
        let mut ordered: BTreeMap<u64, OrderRecord> = BTreeMap::new();
        let mut processed: BTreeSet<u64> = BTreeSet::new();

        for (from, to) in block_windows(from, to, self.max_block_range) {
            let requests = self
                .client
                .query_events(
                    &EventFilter::range(EventKind::OrderRequested, from, to).purpose(self.purpose_index),
                )
                .await?;
            for order in requests.iter().filter_map(ChainEvent::as_order) {
                ordered.entry(order.nonce).or_insert(order);
            }

            let settled = self
                .client
                .query_events(
                    &EventFilter::range(EventKind::OrderProcessed, from, to).purpose(self.purpose_index),
                )
                .await?;
            processed.extend(settled.iter().filter_map(|e| e.processed_nonce()).map(|(_, n)| n));
        }
        Ok((ordered, processed))
    }

    /// Backfill order history from genesis to `boot_height`.
    ///
    /// Returns the tracker and the unprocessed orders, oldest first.
    pub async fn recover(&self, boot_height: u64) -> SettleResult<(NonceTracker, Vec<OrderRecord>)> {
        let genesis = self.client.genesis_block().await?;
        let (ordered, processed) = self.scan(genesis, boot_height).await?;

        let tracker = NonceTracker::from_history(ordered.keys().copied(), processed);
        let pending = ordered
            .into_values()
            .filter(|order| tracker.unprocessed().contains(&order.nonce))
            .collect::<Vec<_>>();

        info!(
            purpose_index = self.purpose_index,
            genesis,
            boot_height,
            unprocessed = pending.len(),
            latest_processed = ?tracker.latest_processed(),
            "recovered order history"
        );
        Ok((tracker, pending))
    }

    /// Recover, retrying transient failures until cancelled.
    async fn recover_until_ready(
        &self,
        boot_height: u64,
        cancel: &CancellationToken,
    ) -> Option<(NonceTracker, Vec<OrderRecord>)> {
        loop {
            match self.recover(boot_height).await {
                Ok(recovered) => return Some(recovered),
                Err(e) => {
                    e.log("order watcher recovery");
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
            }
        }
    }

    /// Re-query the chain from `from` to its head after the live feed overflowed.
    ///
    /// Returns the head and the requests the chain still shows unprocessed,
    /// oldest first.
    pub async fn backfill(&self, from: u64) -> SettleResult<(u64, Vec<OrderRecord>)> {
        let head = self.client.latest_block().await?;
        if head < from {
            return Ok((head, Vec::new()));
        }
        let (ordered, processed) = self.scan(from, head).await?;
        let missed = ordered
            .into_values()
            .filter(|order| !processed.contains(&order.nonce))
            .collect();
        Ok((head, missed))
    }

    async fn backfill_until_ready(
        &self,
        from: u64,
        cancel: &CancellationToken,
    ) -> Option<(u64, Vec<OrderRecord>)> {
        loop {
            match self.backfill(from).await {
                Ok(found) => return Some(found),
                Err(e) => {
                    e.log("order watcher backfill");
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
            }
        }
    }

    /// Our order in a live event; every request of this contract advances `scanned_to`.
    fn observe(&mut self, event: &ChainEvent) -> Option<OrderRecord> {
        if event.kind != EventKind::OrderRequested
            || !event.contract.eq_ignore_ascii_case(self.client.address())
        {
            return None;
        }
        self.scanned_to = self.scanned_to.max(event.block_number);
        event
            .as_order()
            .filter(|order| order.purpose_index == self.purpose_index)
    }

    fn build_call(&self, order: &OrderRecord, proof: &FairnessProof) -> SettlementCall {
        let (purpose_index, nonce) = (order.purpose_index, order.nonce);
        match self.mode {
            SettlementMode::Basic => SettlementCall::Fulfill {
                purpose_index,
                nonce,
                randomness: proof.outcome_hash.clone(),
            },
            SettlementMode::TwoStep => SettlementCall::FulfillThenReveal {
                purpose_index,
                nonce,
                randomness: proof.outcome_hash.clone(),
                secret: proof.secret.clone(),
            },
            SettlementMode::OnChainSecure => SettlementCall::RevealOnChain {
                purpose_index,
                nonce,
                secret: proof.secret.clone(),
            },
            SettlementMode::ApiSecure => SettlementCall::RevealWithRandomness {
                purpose_index,
                nonce,
                secret: proof.secret.clone(),
                randomness: proof.outcome_hash.clone(),
            },
        }
    }

    fn skip(&self, reason: &str) {
        self.metrics
            .orders_skipped
            .with_label_values(&[&self.label, reason])
            .inc();
    }

    /// Settle one order. `Ok(None)` means it was skipped.
    pub async fn process_order(&mut self, order: &OrderRecord) -> SettleResult<Option<TxReceipt>> {
        let nonce = order.nonce;
        if !self.tracker.is_admissible(nonce) {
            debug!(purpose_index = self.purpose_index, nonce, "order already processed, skipping");
            self.skip("processed");
            return Ok(None);
        }

        if self.client.is_paused().await? {
            info!(purpose_index = self.purpose_index, nonce, "contract paused, leaving order for recovery");
            self.skip("paused");
            return Ok(None);
        }

        let matches = self
            .client
            .query_events(
                &EventFilter::range(EventKind::OrderRequested, order.block_number, order.block_number)
                    .purpose(self.purpose_index)
                    .nonce(nonce),
            )
            .await?;
        let request = match matches.as_slice() {
            [single] => single.as_order().ok_or(ConsistencyError::FairnessEventCount {
                purpose_index: self.purpose_index,
                nonce,
                found: 0,
            })?,
            other => {
                return Err(ConsistencyError::FairnessEventCount {
                    purpose_index: self.purpose_index,
                    nonce,
                    found: other.len(),
                }
                .into())
            }
        };

        let proof = self.resolver.resolve_commitment(
            request.client_seed.as_deref(),
            nonce,
            request.hashed_secret.as_deref(),
            "watcher",
        )?;
        if !proof.legitimate {
            warn!(
                purpose_index = self.purpose_index,
                nonce,
                "settling with an uncommitted secret"
            );
        }

        let call = self.build_call(&request, &proof);
        let receipt = match self.client.submit_settlement(&call).await {
            Ok(receipt) => receipt,
            Err(e @ SettleError::Infra(InfraError::Unconfirmed { .. })) => {
                // Possibly mined; the next recovery reads the real outcome.
                self.tracker.mark_processed(nonce);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if !receipt.success {
            return Err(InfraError::TransactionReverted {
                tx_hash: receipt.tx_hash,
            }
            .into());
        }

        self.tracker.mark_processed(nonce);
        self.metrics
            .orders_settled
            .with_label_values(&[&self.label])
            .inc();
        self.metrics
            .unprocessed_orders
            .with_label_values(&[&self.label])
            .set(self.tracker.unprocessed().len() as i64);

        for log in receipt
            .logs
            .iter()
            .filter(|log| !matches!(log.kind, EventKind::Other { .. }))
        {
            let _ = self.audit.send(log.clone());
        }

        info!(
            purpose_index = self.purpose_index,
            nonce,
            tx_hash = %receipt.tx_hash,
            legitimate = proof.legitimate,
            "order settled"
        );
        Ok(Some(receipt))
    }

    async fn handle(&mut self, order: OrderRecord) {
        if let Err(e) = self.process_order(&order).await {
            self.metrics
                .orders_failed
                .with_label_values(&[&self.label])
                .inc();
            error!(
                purpose_index = self.purpose_index,
                nonce = order.nonce,
                error = %e,
                "order settlement failed, leaving it for the next recovery"
            );
        }
    }

    /// Recover from genesis to `boot_height`, then settle recovered, injected
    /// and live orders one at a time until cancelled.
    ///
    /// `live` must be subscribed before the syncers start so no order lands
    /// between the recovery horizon and the first live event. When the feed
    /// overflows, the skipped stretch is re-queried from the chain.
    pub async fn run(
        mut self,
        mut live: broadcast::Receiver<ChainEvent>,
        boot_height: u64,
        cancel: CancellationToken,
    ) -> SettleResult<()> {
        let _ = self.phase.send(WatcherPhase::Recovering);
        let Some((tracker, recovered)) = self.recover_until_ready(boot_height, &cancel).await else {
            let _ = self.phase.send(WatcherPhase::Stopped);
            return Ok(());
        };
        self.tracker = tracker;
        self.metrics
            .unprocessed_orders
            .with_label_values(&[&self.label])
            .set(self.tracker.unprocessed().len() as i64);

        self.scanned_to = boot_height;
        let mut recovered: VecDeque<OrderRecord> = recovered.into();
        let _ = self.phase.send(WatcherPhase::Live);
        info!(purpose_index = self.purpose_index, mode = ?self.mode, "order watcher live");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = match recovered.pop_front() {
                Some(order) => Some(order),
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(order) = self.injected.recv() => Some(order),
                    received = live.recv() => match received {
                        Ok(event) => self.observe(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            let from = self.scanned_to + 1;
                            warn!(
                                purpose_index = self.purpose_index,
                                skipped,
                                from,
                                "live order feed lagged, backfilling from the chain"
                            );
                            self.metrics
                                .live_feed_gaps
                                .with_label_values(&[&self.label])
                                .inc();
                            let Some((head, missed)) = self.backfill_until_ready(from, &cancel).await else {
                                break;
                            };
                            info!(
                                purpose_index = self.purpose_index,
                                from,
                                to = head,
                                missed = missed.len(),
                                "backfilled live order gap"
                            );
                            self.scanned_to = self.scanned_to.max(head);
                            for order in missed {
                                self.tracker.note_unprocessed(order.nonce);
                                recovered.push_back(order);
                            }
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(purpose_index = self.purpose_index, "live order feed closed");
                            break;
                        }
                    },
                },
            };

            if let Some(order) = next {
                self.handle(order).await;
            }
        }

        let _ = self.phase.send(WatcherPhase::Stopped);
        info!(purpose_index = self.purpose_index, "order watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MeteredContract, MockContract};
    use crate::secrets::SecretCommitmentStore;

    struct Fixture {
        mock: MockContract,
        resolver: RandomnessResolver,
        watcher: OrderWatcher,
        handle: WatcherHandle,
    }

    fn fixture(mode: SettlementMode) -> Fixture {
        let mock = MockContract::new("0xabc", 1);
        fixture_over(mock.clone(), Arc::new(mock), mode)
    }

    fn fixture_over(mock: MockContract, client: Arc<dyn ContractClient>, mode: SettlementMode) -> Fixture {
        let metrics = Arc::new(SettlerMetrics::unregistered().unwrap());
        let secrets = SecretCommitmentStore::new(Duration::from_secs(60), metrics.clone()).unwrap();
        let resolver = RandomnessResolver::new(Arc::new(secrets), metrics.clone());
        let (watcher, handle) = OrderWatcher::new(
            client,
            resolver.clone(),
            0,
            mode,
            10,
            Duration::from_secs(1),
            metrics,
        );
        Fixture {
            mock,
            resolver,
            watcher,
            handle,
        }
    }

    #[tokio::test]
    async fn test_recover_computes_unprocessed() {
        let f = fixture(SettlementMode::Basic);
        for nonce in 0..5 {
            f.mock.place_order(0, nonce, None, None);
            f.mock.mine_blocks(7);
        }
        f.mock.place_order(1, 0, None, None);
        f.mock.mark_processed(0, 0);
        f.mock.mark_processed(0, 2);

        let (tracker, pending) = f.watcher.recover(f.mock.height()).await.unwrap();
        assert_eq!(
            pending.iter().map(|o| o.nonce).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
        assert_eq!(tracker.latest_processed(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_order_settles_with_committed_secret() {
        let mut f = fixture(SettlementMode::ApiSecure);
        let hash = f.resolver.secrets().request_commitment().unwrap();
        let receipt = f.mock.place_order(0, 0, Some("0x01"), Some(&hash));
        let order = receipt.logs[0].as_order().unwrap();

        let mut audit = f.handle.subscribe_audit();
        let settled = f.watcher.process_order(&order).await.unwrap();
        assert!(settled.is_some());

        match &f.mock.settlements()[0] {
            SettlementCall::RevealWithRandomness { nonce, secret, .. } => {
                assert_eq!(*nonce, 0);
                let revealed: [u8; 32] = hex::decode(secret).unwrap().try_into().unwrap();
                assert_eq!(crate::secrets::commitment_hash(&revealed), hash);
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(audit.recv().await.unwrap().processed_nonce(), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_redelivered_nonce_is_not_resubmitted() {
        let mut f = fixture(SettlementMode::Basic);
        let order = f.mock.place_order(0, 0, None, None).logs[0].as_order().unwrap();

        assert!(f.watcher.process_order(&order).await.unwrap().is_some());
        assert!(f.watcher.process_order(&order).await.unwrap().is_none());
        assert_eq!(f.mock.settlements().len(), 1);
    }

    #[tokio::test]
    async fn test_paused_contract_skips() {
        let mut f = fixture(SettlementMode::Basic);
        let order = f.mock.place_order(0, 0, None, None).logs[0].as_order().unwrap();
        f.mock.set_paused(true);

        assert!(f.watcher.process_order(&order).await.unwrap().is_none());
        assert!(f.mock.settlements().is_empty());
        assert!(f.watcher.tracker.is_admissible(0));
    }

    #[tokio::test]
    async fn test_duplicate_request_events_are_inconsistent() {
        let mut f = fixture(SettlementMode::Basic);
        let receipt = f.mock.place_order(0, 0, None, None);
        let mut duplicate = receipt.logs[0].clone();
        duplicate.log_index = 1;
        f.mock.push_raw_event(duplicate);

        let order = receipt.logs[0].as_order().unwrap();
        match f.watcher.process_order(&order).await {
            Err(SettleError::Consistency(ConsistencyError::FairnessEventCount { found, .. })) => {
                assert_eq!(found, 2)
            }
            other => panic!("expected consistency error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_call_per_mode() {
        let proof = crate::fairness::prove(&[0u8; 32], 3, &[1u8; 32], true);
        let order = OrderRecord {
            contract: "0xabc".to_string(),
            purpose_index: 0,
            nonce: 3,
            block_number: 1,
            tx_hash: "0x1".to_string(),
            client_seed: None,
            hashed_secret: None,
        };

        let expectations = [
            (SettlementMode::Basic, "fulfill"),
            (SettlementMode::TwoStep, "fulfill_then_reveal"),
            (SettlementMode::OnChainSecure, "reveal_on_chain"),
            (SettlementMode::ApiSecure, "reveal_with_randomness"),
        ];
        for (mode, tag) in expectations {
            let f = fixture(mode);
            let call = f.watcher.build_call(&order, &proof);
            assert_eq!(call.nonce(), 3);
            let json = serde_json::to_value(&call).unwrap();
            assert_eq!(json["call"], tag);
        }
    }

    #[tokio::test]
    async fn test_inject_receipt_filters_foreign_logs() {
        let f = fixture(SettlementMode::Basic);
        let mut receipt = f.mock.place_order(0, 0, None, None);
        receipt
            .logs
            .extend(f.mock.place_order(7, 0, None, None).logs);

        assert_eq!(f.handle.inject_receipt(&receipt).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lagged_feed_is_backfilled_from_chain() {
        let f = fixture(SettlementMode::Basic);
        let boot_height = f.mock.height();
        let metrics = f.watcher.metrics.clone();

        // Capacity 2 with 6 sends: the first receive reports a lag of 4
        let (feed, live) = broadcast::channel(2);
        for nonce in 0..6 {
            let receipt = f.mock.place_order(0, nonce, None, None);
            feed.send(receipt.logs[0].clone()).unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.watcher.run(live, boot_height, cancel.clone()));
        let mock = f.mock.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while mock.settlements().len() < 6 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("every order settles despite the lag");

        cancel.cancel();
        task.await.unwrap().unwrap();
        drop(feed);

        let nonces: Vec<u64> = f.mock.settlements().iter().map(|c| c.nonce()).collect();
        assert_eq!(nonces, (0..6).collect::<Vec<_>>());
        assert_eq!(metrics.live_feed_gaps.with_label_values(&["0"]).get(), 1);
    }

    #[tokio::test]
    async fn test_backfill_returns_only_unprocessed_requests() {
        let f = fixture(SettlementMode::Basic);
        let from = f.mock.height() + 1;
        f.mock.place_order(0, 0, None, None);
        f.mock.place_order(0, 1, None, None);
        f.mock.place_order(3, 0, None, None);
        f.mock.mark_processed(0, 0);

        let (head, missed) = f.watcher.backfill(from).await.unwrap();
        assert_eq!(head, f.mock.height());
        assert_eq!(missed.iter().map(|o| o.nonce).collect::<Vec<_>>(), vec![1]);

        let (_, nothing) = f.watcher.backfill(head + 1).await.unwrap();
        assert!(nothing.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_settlement_is_not_resubmitted() {
        let mock = MockContract::new("0xabc", 1);
        mock.set_confirmation_delay(Duration::from_secs(15));
        let client = MeteredContract::new(
            mock.clone(),
            Arc::new(SettlerMetrics::unregistered().unwrap()),
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::ZERO,
            1,
        );
        let mut f = fixture_over(mock, Arc::new(client), SettlementMode::Basic);
        let order = f.mock.place_order(0, 0, None, None).logs[0].as_order().unwrap();

        assert!(matches!(
            f.watcher.process_order(&order).await,
            Err(SettleError::Infra(InfraError::Unconfirmed { .. }))
        ));
        assert!(f.watcher.process_order(&order).await.unwrap().is_none());
        assert_eq!(f.mock.settlements().len(), 1);
    }
}
