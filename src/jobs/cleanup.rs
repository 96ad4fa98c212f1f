//! Sweeps that enforce visibility timeouts, retry budgets, and TTLs.

use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{
    MetricsSink, EXPIRED_CLEANUP_REASON, EXPIRED_MOVED_TO_DLQ_REASON, FAILED_CLEANUP_REASON,
    FAILED_MOVED_TO_DLQ_REASON,
};
use crate::store::MessageStore;

use super::Job;

/// Rescues Processing rows whose consumer blew the visibility timeout.
pub fn stale_recovery(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("stale-recovery", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.recover_stale().await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics.inc_messages_stale_recovered(rows);
                        tracing::info!(rows, "recovered stale messages");
                    }
                }
                Err(e) => tracing::error!("failed to recover stale messages: {e}"),
            }
        }
    })
}

/// Moves Failed rows in regular queues to their DLQs.
pub fn failed_promotion(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("failed-promotion", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.promote_failed().await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics.inc_messages_moved_to_dlq(rows, FAILED_MOVED_TO_DLQ_REASON);
                        tracing::info!(rows, "moved failed messages to DLQ");
                    }
                }
                Err(e) => tracing::error!("failed to move failed messages to DLQ: {e}"),
            }
        }
    })
}

/// Moves expired rows in regular queues to their DLQs.
pub fn expired_promotion(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("expired-promotion", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.promote_expired().await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics.inc_messages_moved_to_dlq(rows, EXPIRED_MOVED_TO_DLQ_REASON);
                        tracing::info!(rows, "moved expired messages to DLQ");
                    }
                }
                Err(e) => tracing::error!("failed to move expired messages to DLQ: {e}"),
            }
        }
    })
}

/// Deletes DLQ rows that failed again after a requeue.
pub fn dlq_failed_purge(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("dlq-failed-purge", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.purge_dlq_failed().await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics.inc_messages_cleanup(rows, FAILED_CLEANUP_REASON);
                        tracing::info!(rows, "purged failed messages from DLQs");
                    }
                }
                Err(e) => tracing::error!("failed to purge failed messages from DLQs: {e}"),
            }
        }
    })
}

/// Deletes DLQ rows past their DLQ TTL.
pub fn dlq_expired_purge(
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    every: Duration,
) -> Job {
    Job::spawn("dlq-expired-purge", every, move || {
        let store = store.clone();
        let metrics = metrics.clone();
        async move {
            match store.purge_dlq_expired().await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics.inc_messages_cleanup(rows, EXPIRED_CLEANUP_REASON);
                        tracing::info!(rows, "purged expired messages from DLQs");
                    }
                }
                Err(e) => tracing::error!("failed to purge expired messages from DLQs: {e}"),
            }
        }
    })
}
