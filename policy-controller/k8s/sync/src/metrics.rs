use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Reconciliation counters, registered on the admin server's registry.
#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    pub(crate) enqueues: Counter,
    pub(crate) retries: Counter,
    pub(crate) drops: Counter,
    pub(crate) queue_depth: Gauge,
}

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "enqueues",
            "Policy keys enqueued for reconciliation",
            metrics.enqueues.clone(),
        );
        reg.register(
            "retries",
            "Failed reconciliations re-enqueued with backoff",
            metrics.retries.clone(),
        );
        reg.register(
            "drops",
            "Policy keys dropped after exhausting retries",
            metrics.drops.clone(),
        );
        reg.register(
            "queue_depth",
            "Policy keys waiting to be reconciled",
            metrics.queue_depth.clone(),
        );
        metrics
    }
}
