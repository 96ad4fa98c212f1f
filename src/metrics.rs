use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::message::is_dlq_name;

pub const FAILED_MOVED_TO_DLQ_REASON: &str = "failed";
pub const EXPIRED_MOVED_TO_DLQ_REASON: &str = "expired";

pub const FAILED_CLEANUP_REASON: &str = "failed";
pub const EXPIRED_CLEANUP_REASON: &str = "expired";
pub const DELETED_BY_USER_CLEANUP_REASON: &str = "deleted_by_user";

/// Counter and gauge updates emitted by the engine. Pluggable so the broker
/// runs identically with metrics disabled.
pub trait MetricsSink: Send + Sync {
    fn inc_messages_produced(&self, count: u64, queue: &str);
    fn inc_messages_consumed(&self, count: u64, queue: &str);
    fn inc_messages_acked(&self, count: u64, queue: &str);
    fn inc_messages_nacked(&self, count: u64, queue: &str);
    fn inc_messages_requeued(&self, count: u64, queue: &str);
    fn set_queue_depth(&self, queue: &str, depth: i64);
    fn inc_messages_moved_to_dlq(&self, count: u64, reason: &'static str);
    fn inc_messages_stale_recovered(&self, count: u64);
    fn inc_messages_cleanup(&self, count: u64, reason: &'static str);
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_messages_produced(&self, _count: u64, _queue: &str) {}
    fn inc_messages_consumed(&self, _count: u64, _queue: &str) {}
    fn inc_messages_acked(&self, _count: u64, _queue: &str) {}
    fn inc_messages_nacked(&self, _count: u64, _queue: &str) {}
    fn inc_messages_requeued(&self, _count: u64, _queue: &str) {}
    fn set_queue_depth(&self, _queue: &str, _depth: i64) {}
    fn inc_messages_moved_to_dlq(&self, _count: u64, _reason: &'static str) {}
    fn inc_messages_stale_recovered(&self, _count: u64) {}
    fn inc_messages_cleanup(&self, _count: u64, _reason: &'static str) {}
}

/// Prometheus-backed sink on the metrics-rs facade.
///
/// Installs the global recorder once at startup; the `/metrics` endpoint
/// renders the text exposition format from the retained handle.
pub struct PrometheusMetrics {
    handle: PrometheusHandle,
}

impl PrometheusMetrics {
    pub fn install() -> eyre::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| eyre::eyre!("failed to install Prometheus recorder: {e}"))?;

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    fn queue_type(queue: &str) -> &'static str {
        if is_dlq_name(queue) {
            "dlq"
        } else {
            "regular"
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn inc_messages_produced(&self, count: u64, queue: &str) {
        metrics::counter!(
            "forq_messages_produced_total",
            "queue_name" => queue.to_owned(),
            "queue_type" => Self::queue_type(queue)
        )
        .increment(count);
    }

    fn inc_messages_consumed(&self, count: u64, queue: &str) {
        metrics::counter!(
            "forq_messages_consumed_total",
            "queue_name" => queue.to_owned(),
            "queue_type" => Self::queue_type(queue)
        )
        .increment(count);
    }

    fn inc_messages_acked(&self, count: u64, queue: &str) {
        metrics::counter!(
            "forq_messages_acked_total",
            "queue_name" => queue.to_owned(),
            "queue_type" => Self::queue_type(queue)
        )
        .increment(count);
    }

    fn inc_messages_nacked(&self, count: u64, queue: &str) {
        metrics::counter!(
            "forq_messages_nacked_total",
            "queue_name" => queue.to_owned(),
            "queue_type" => Self::queue_type(queue)
        )
        .increment(count);
    }

    // Requeueing only runs DLQ -> regular, so the queue name already names
    // the destination and a queue_type label would carry no information.
    fn inc_messages_requeued(&self, count: u64, queue: &str) {
        metrics::counter!(
            "forq_messages_requeued_total",
            "queue_name" => queue.to_owned()
        )
        .increment(count);
    }

    fn set_queue_depth(&self, queue: &str, depth: i64) {
        metrics::gauge!(
            "forq_queue_depth",
            "queue_name" => queue.to_owned(),
            "queue_type" => Self::queue_type(queue)
        )
        .set(depth as f64);
    }

    // The sweeps run one fire-and-forget UPDATE across all queues; grouping
    // by queue name would force the SQL to aggregate, so these carry only a
    // reason label.
    fn inc_messages_moved_to_dlq(&self, count: u64, reason: &'static str) {
        metrics::counter!("forq_messages_moved_to_dlq_total", "reason" => reason).increment(count);
    }

    fn inc_messages_stale_recovered(&self, count: u64) {
        metrics::counter!("forq_messages_stale_recovered_total").increment(count);
    }

    fn inc_messages_cleanup(&self, count: u64, reason: &'static str) {
        metrics::counter!("forq_messages_cleanup_total", "reason" => reason).increment(count);
    }
}
