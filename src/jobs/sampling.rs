use std::sync::Arc;
use std::time::Duration;

use crate::metrics::MetricsSink;
use crate::store::MessageStore;

use super::Job;

/// Samples per-queue depth into the metrics gauge. Only started when metrics
/// are enabled.
pub fn queue_depth(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("queue-depth-sample", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.select_all_queue_stats().await {
                Ok(stats) => {
                    for queue in stats {
                        metrics.set_queue_depth(&queue.name, queue.message_count);
                    }
                }
                Err(e) => tracing::error!("failed to sample queue depths: {e}"),
            }
        }
    })
}
