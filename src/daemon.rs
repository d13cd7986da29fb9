//! Service wiring for the settlement daemon
//!
//! [`Daemon::start`] builds every service from the configuration, injects the
//! shared collaborators and spawns one task per pipeline. All tasks observe a
//! single cancellation token; [`Daemon::shutdown`] cancels it and waits for
//! them to drain.

use crate::api::CasinoApi;
use crate::chain::{ContractClient, MeteredContract};
use crate::common::traits::{BalanceRepository, CheckpointRepository, EventStore};
use crate::common::types::{ChainEvent, Credits, EventKind};
use crate::config::SettlerConfig;
use crate::errors::SettleResult;
use crate::fairness::RandomnessResolver;
use crate::ledger::AccountLedger;
use crate::metrics::{self, SettlerMetrics};
use crate::secrets::SecretCommitmentStore;
use crate::sync::{EventSyncer, HeightWatcher};
use crate::watcher::{OrderWatcher, WatcherHandle, WatcherPhase};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Event streams mirrored for every contract
pub const TRACKED_EVENTS: [EventKind; 2] = [EventKind::OrderRequested, EventKind::OrderProcessed];

pub struct Daemon {
    config: SettlerConfig,
    registry: Registry,
    metrics: Arc<SettlerMetrics>,
    secrets: Arc<SecretCommitmentStore>,
    ledger: Arc<AccountLedger>,
    api: CasinoApi,
    watchers: Vec<WatcherHandle>,
    events: broadcast::Sender<ChainEvent>,
    height: HeightWatcher,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<SettleResult<()>>)>,
}

impl Daemon {
    /// Validate the configuration, build the services and start every pipeline.
    ///
    /// `contract` is wrapped in a [`MeteredContract`] carrying the configured
    /// RPC and confirmation timeouts and request limits.
    pub async fn start<C, R>(config: SettlerConfig, contract: C, repo: Arc<R>) -> SettleResult<Self>
    where
        C: ContractClient + 'static,
        R: CheckpointRepository + EventStore + BalanceRepository + 'static,
    {
        config.validate()?;

        let registry = Registry::new();
        let metrics = Arc::new(if config.monitoring.enable_metrics {
            SettlerMetrics::new(&registry)?
        } else {
            SettlerMetrics::unregistered()?
        });

        let client: Arc<dyn ContractClient> = Arc::new(MeteredContract::new(
            contract,
            metrics.clone(),
            config.rpc_timeout(),
            config.confirmation_timeout(),
            config.min_request_delay(),
            config.rpc.max_concurrent_requests,
        ));
        let secrets = Arc::new(SecretCommitmentStore::new(config.secret_ttl(), metrics.clone())?);
        let resolver = RandomnessResolver::new(secrets.clone(), metrics.clone());

        let boot_height = client.latest_block().await?;
        let cancel = CancellationToken::new();
        let height = HeightWatcher::spawn(
            client.clone(),
            boot_height,
            config.poll_interval(),
            cancel.clone(),
            metrics.clone(),
        );

        let (events, _) = broadcast::channel(config.sync.event_channel_capacity);
        let mut tasks = Vec::new();

        // Watchers subscribe before any syncer can publish
        let mut watchers = Vec::with_capacity(config.watchers.len());
        for watcher_config in &config.watchers {
            let (watcher, handle) = OrderWatcher::new(
                client.clone(),
                resolver.clone(),
                watcher_config.purpose_index,
                watcher_config.mode,
                config.sync.max_block_range,
                config.poll_interval(),
                metrics.clone(),
            );
            let live = events.subscribe();
            tasks.push((
                format!("watcher:{}", watcher_config.purpose_index),
                tokio::spawn(watcher.run(live, boot_height, cancel.clone())),
            ));
            watchers.push(handle);
        }

        // Watchers recover history up to `boot_height` themselves
        for kind in TRACKED_EVENTS {
            let syncer = EventSyncer::new(
                client.clone(),
                repo.clone(),
                repo.clone(),
                kind,
                config.sync.max_block_range,
                config.window_pause(),
                events.clone(),
                metrics.clone(),
            )
            .publish_after(boot_height);
            tasks.push((
                format!("syncer:{}", syncer.event_name()),
                tokio::spawn(syncer.run(height.subscribe(), cancel.clone())),
            ));
        }

        let ledger = Arc::new(AccountLedger::new(
            client.clone(),
            repo,
            resolver,
            config.chain.chain_id,
            Credits::from(config.ledger.min_wager),
            config.ledger.min_plays_before_withdraw,
            metrics.clone(),
        ));
        tasks.push((
            "lock-pruner".to_string(),
            tokio::spawn(prune_locks(ledger.clone(), cancel.clone())),
        ));

        let api = CasinoApi::new(ledger.clone(), secrets.clone(), config.ledger.challenge.clone());

        info!(
            contract = %client.address(),
            chain_id = config.chain.chain_id,
            boot_height,
            watchers = watchers.len(),
            "settlement daemon started"
        );

        Ok(Self {
            config,
            registry,
            metrics,
            secrets,
            ledger,
            api,
            watchers,
            events,
            height,
            cancel,
            tasks,
        })
    }

    pub fn config(&self) -> &SettlerConfig {
        &self.config
    }

    pub fn api(&self) -> &CasinoApi {
        &self.api
    }

    pub fn ledger(&self) -> Arc<AccountLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn secrets(&self) -> Arc<SecretCommitmentStore> {
        Arc::clone(&self.secrets)
    }

    pub fn metrics(&self) -> Arc<SettlerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn watchers(&self) -> &[WatcherHandle] {
        &self.watchers
    }

    /// Events mined after boot, as the syncers mirror them
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn chain_height(&self) -> u64 {
        self.height.latest()
    }

    /// Prometheus text exposition of the daemon's registry
    pub fn render_metrics(&self) -> String {
        metrics::render(&self.registry)
    }

    /// Resolve once every watcher has finished recovery.
    pub async fn wait_until_live(&self) {
        for handle in &self.watchers {
            handle.wait_for_phase(WatcherPhase::Live).await;
        }
    }

    /// Cancel every pipeline and wait for the tasks to finish.
    pub async fn shutdown(self) -> SettleResult<()> {
        info!("shutting down settlement daemon");
        self.cancel.cancel();
        self.secrets.shutdown();

        let mut first_error = None;
        for (name, task) in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    e.log(&name);
                    first_error.get_or_insert(e);
                }
                Err(e) => error!(task = %name, error = %e, "task panicked or was aborted"),
            }
        }
        if let Err(e) = self.height.into_handle().await {
            error!(task = "height", error = %e, "task panicked or was aborted");
        }

        info!("settlement daemon stopped");
        first_error.map_or(Ok(()), Err)
    }
}

async fn prune_locks(ledger: Arc<AccountLedger>, cancel: CancellationToken) -> SettleResult<()> {
    let mut ticker = time::interval(LOCK_PRUNE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let pruned = ledger.locks().prune();
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned idle account locks");
                }
            }
        }
    }
}
