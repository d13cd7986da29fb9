//! Prometheus metrics for the settlement pipelines

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0,
];

#[derive(Clone, Debug)]
pub struct SettlerMetrics {
    pub(crate) last_synced_block: IntGaugeVec,
    pub(crate) sync_window_failures: IntCounterVec,
    pub(crate) mirrored_events: IntCounterVec,
    pub(crate) latest_chain_height: IntGauge,

    pub(crate) orders_settled: IntCounterVec,
    pub(crate) orders_skipped: IntCounterVec,
    pub(crate) orders_failed: IntCounterVec,
    pub(crate) unprocessed_orders: IntGaugeVec,
    pub(crate) live_feed_gaps: IntCounterVec,
    pub(crate) illegitimate_fairness: IntCounterVec,

    pub(crate) live_secrets: IntGauge,

    pub(crate) ledger_operations: IntCounterVec,

    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_errors: IntCounterVec,
    pub(crate) rpc_latency: HistogramVec,
}

impl SettlerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            last_synced_block: register_int_gauge_vec_with_registry!(
                "settler_last_synced_block",
                "Last fully synced block per event stream",
                &["event_name"],
                registry,
            )?,
            sync_window_failures: register_int_counter_vec_with_registry!(
                "settler_sync_window_failures",
                "Total number of block windows that failed to sync",
                &["event_name"],
                registry,
            )?,
            mirrored_events: register_int_counter_vec_with_registry!(
                "settler_mirrored_events",
                "Total number of newly mirrored contract events",
                &["event_name"],
                registry,
            )?,
            latest_chain_height: register_int_gauge_with_registry!(
                "settler_latest_chain_height",
                "Latest block height observed by the shared height source",
                registry,
            )?,
            orders_settled: register_int_counter_vec_with_registry!(
                "settler_orders_settled",
                "Total number of orders settled on chain",
                &["purpose_index"],
                registry,
            )?,
            orders_skipped: register_int_counter_vec_with_registry!(
                "settler_orders_skipped",
                "Total number of orders skipped, by reason",
                &["purpose_index", "reason"],
                registry,
            )?,
            orders_failed: register_int_counter_vec_with_registry!(
                "settler_orders_failed",
                "Total number of orders whose settlement failed this run",
                &["purpose_index"],
                registry,
            )?,
            unprocessed_orders: register_int_gauge_vec_with_registry!(
                "settler_unprocessed_orders",
                "Orders known to be awaiting settlement",
                &["purpose_index"],
                registry,
            )?,
            live_feed_gaps: register_int_counter_vec_with_registry!(
                "settler_live_feed_gaps",
                "Times the live order feed overflowed and was back-filled from the chain",
                &["purpose_index"],
                registry,
            )?,
            illegitimate_fairness: register_int_counter_vec_with_registry!(
                "settler_illegitimate_fairness",
                "Outcomes resolved with a secret that was never committed",
                &["source"],
                registry,
            )?,
            live_secrets: register_int_gauge_with_registry!(
                "settler_live_secrets",
                "Secret commitments awaiting reveal",
                registry,
            )?,
            ledger_operations: register_int_counter_vec_with_registry!(
                "settler_ledger_operations",
                "Ledger operations by kind and result",
                &["operation", "result"],
                registry,
            )?,
            rpc_queries: register_int_counter_vec_with_registry!(
                "settler_rpc_queries",
                "Total number of contract RPC queries, by method",
                &["method"],
                registry,
            )?,
            rpc_errors: register_int_counter_vec_with_registry!(
                "settler_rpc_errors",
                "Total number of failed contract RPC queries, by method",
                &["method"],
                registry,
            )?,
            rpc_latency: register_histogram_vec_with_registry!(
                "settler_rpc_latency",
                "Latency of contract RPC queries, by method",
                &["method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )?,
        })
    }

    /// Metrics bound to a private registry, for tests and embedded use.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }
}

/// Render a registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let registry = Registry::new();
        let metrics = SettlerMetrics::new(&registry).unwrap();

        metrics
            .last_synced_block
            .with_label_values(&["0xabc:OrderRequested"])
            .set(42);
        metrics.live_secrets.inc();

        let text = render(&registry);
        assert!(text.contains("settler_last_synced_block"));
        assert!(text.contains("settler_live_secrets 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        assert!(SettlerMetrics::new(&registry).is_ok());
        assert!(SettlerMetrics::new(&registry).is_err());
    }
}
