//! Timeout, request spacing and metrics around any contract client
//!
//! Reads are bounded by the RPC timeout. Submissions wait for their receipt
//! under the separate confirmation timeout; when that fires the transaction
//! may already be mined, so callers get `InfraError::Unconfirmed`.

use super::{ContractClient, EventFilter};
use crate::common::types::{ChainEvent, Credits, OnChainTotals, SettlementCall, TxReceipt};
use crate::errors::{InfraError, SettleResult};
use crate::metrics::SettlerMetrics;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

pub struct MeteredContract<C> {
    inner: C,
    metrics: Arc<SettlerMetrics>,
    timeout: Duration,
    confirmation_timeout: Duration,
    min_request_delay: Duration,
    semaphore: Arc<Semaphore>,
    /// Last request time to enforce minimum delay between requests
    last_request_time: Arc<Mutex<Option<Instant>>>,
}

impl<C: ContractClient> MeteredContract<C> {
    pub fn new(
        inner: C,
        metrics: Arc<SettlerMetrics>,
        timeout: Duration,
        confirmation_timeout: Duration,
        min_request_delay: Duration,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            inner,
            metrics,
            timeout,
            confirmation_timeout,
            min_request_delay,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            last_request_time: Arc::new(Mutex::new(None)),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn call<T, F>(&self, method: &'static str, fut: F) -> SettleResult<T>
    where
        T: Send,
        F: Future<Output = SettleResult<T>> + Send,
    {
        self.bounded(method, self.timeout, fut, |timeout_ms| InfraError::Timeout {
            method: method.to_string(),
            timeout_ms,
        })
        .await
    }

    async fn submit<F>(&self, method: &'static str, fut: F) -> SettleResult<TxReceipt>
    where
        F: Future<Output = SettleResult<TxReceipt>> + Send,
    {
        self.bounded(method, self.confirmation_timeout, fut, |timeout_ms| {
            InfraError::Unconfirmed {
                method: method.to_string(),
                reason: format!("no receipt within {}ms", timeout_ms),
            }
        })
        .await
    }

    async fn bounded<T, F>(
        &self,
        method: &'static str,
        limit: Duration,
        fut: F,
        on_timeout: impl FnOnce(u64) -> InfraError + Send,
    ) -> SettleResult<T>
    where
        T: Send,
        F: Future<Output = SettleResult<T>> + Send,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| InfraError::ShuttingDown)?;

        if !self.min_request_delay.is_zero() {
            let mut last_request = self.last_request_time.lock().await;
            if let Some(last) = *last_request {
                let elapsed = Instant::now().saturating_duration_since(last);
                if elapsed < self.min_request_delay {
                    tokio::time::sleep(self.min_request_delay - elapsed).await;
                }
            }
            *last_request = Some(Instant::now());
        }

        self.metrics.rpc_queries.with_label_values(&[method]).inc();
        let _timer = self
            .metrics
            .rpc_latency
            .with_label_values(&[method])
            .start_timer();

        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit.as_millis() as u64).into()),
        };

        if let Err(e) = &result {
            self.metrics.rpc_errors.with_label_values(&[method]).inc();
            tracing::debug!(method, error = %e, "contract call failed");
        }
        result
    }
}

#[async_trait]
impl<C: ContractClient> ContractClient for MeteredContract<C> {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn genesis_block(&self) -> SettleResult<u64> {
        self.call("genesis_block", self.inner.genesis_block()).await
    }

    async fn latest_block(&self) -> SettleResult<u64> {
        self.call("latest_block", self.inner.latest_block()).await
    }

    async fn is_paused(&self) -> SettleResult<bool> {
        self.call("is_paused", self.inner.is_paused()).await
    }

    async fn account_totals(&self, address: &str) -> SettleResult<OnChainTotals> {
        self.call("account_totals", self.inner.account_totals(address))
            .await
    }

    async fn can_pay(&self, amount: Credits) -> SettleResult<bool> {
        self.call("can_pay", self.inner.can_pay(amount)).await
    }

    async fn query_events(&self, filter: &EventFilter) -> SettleResult<Vec<ChainEvent>> {
        self.call("query_events", self.inner.query_events(filter)).await
    }

    async fn submit_settlement(&self, call: &SettlementCall) -> SettleResult<TxReceipt> {
        self.submit("submit_settlement", self.inner.submit_settlement(call))
            .await
    }

    async fn submit_payout(&self, address: &str, amount: Credits) -> SettleResult<TxReceipt> {
        self.submit("submit_payout", self.inner.submit_payout(address, amount))
            .await
    }
}
