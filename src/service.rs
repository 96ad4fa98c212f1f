use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Error;
use crate::id::MessageIdGenerator;
use crate::message::{
    is_dlq_name, regular_name_for, ClaimedMessage, MessageDetails, MessageMetadata, NewMessage,
};
use crate::metrics::{MetricsSink, DELETED_BY_USER_CLEANUP_REASON};
use crate::queue::{QueueStats, QueuesOverview};
use crate::store::MessageStore;

/// How often the long-poll loop re-probes the store for a ready message.
const FETCH_TICK: Duration = Duration::from_millis(100);

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageRequest {
    pub content: String,
    /// Millisecond epoch timestamp before which the message stays invisible.
    /// Zero means deliver immediately.
    #[serde(default)]
    pub process_after: i64,
}

/// One page of message metadata, cursor-paginated newest-first.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageMetadata>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub queue: String,
    pub is_dlq: bool,
}

/// Produce/consume lifecycle plus the DLQ admin operations, with all input
/// validation and guard rails. The store does the state transitions; this
/// layer decides whether they are allowed to happen.
pub struct MessageService {
    store: Arc<MessageStore>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl MessageService {
    pub fn new(
        store: Arc<MessageStore>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            metrics,
            clock,
            config,
        }
    }

    pub async fn produce(&self, queue: &str, request: NewMessageRequest) -> Result<(), Error> {
        if request.content.len() > self.config.message_content_max_size_bytes() {
            tracing::warn!(size = request.content.len(), "message content exceeds limit");
            return Err(Error::ContentExceedsLimit);
        }

        let now = self.clock.now_ms();

        let process_after = if request.process_after == 0 {
            now
        } else {
            // small tolerance for producer clock skew
            if request.process_after + self.config.process_after_buffer_ms() < now {
                tracing::warn!(
                    process_after = request.process_after,
                    "processAfter is in the past"
                );
                return Err(Error::ProcessAfterInPast);
            }
            if request.process_after > now + self.config.max_process_after_delay_ms() {
                tracing::warn!(
                    process_after = request.process_after,
                    "processAfter is too far in the future"
                );
                return Err(Error::ProcessAfterTooFar);
            }
            request.process_after
        };

        let message = NewMessage {
            id: MessageIdGenerator::generate(self.clock.as_ref()),
            queue: queue.to_owned(),
            content: request.content,
            process_after,
            received_at: now,
            updated_at: now,
            expires_after: now + self.config.queue_ttl_ms(),
        };

        self.store.insert(&message).await?;
        self.metrics.inc_messages_produced(1, queue);

        Ok(())
    }

    /// Long-polls the queue: one atomic claim probe per tick until a message
    /// appears or the polling window closes. A dropped request future (client
    /// disconnect) aborts the loop between probes, so no partial state leaks.
    pub async fn fetch(&self, queue: &str) -> Result<Option<ClaimedMessage>, Error> {
        let budget = self.config.polling_duration();
        let started = tokio::time::Instant::now();

        let mut ticker = tokio::time::interval(FETCH_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            if let Some(message) = self.store.claim_one(queue).await? {
                self.metrics.inc_messages_consumed(1, queue);
                return Ok(Some(message));
            }

            if started.elapsed() > budget {
                return Ok(None);
            }

            ticker.tick().await;
        }
    }

    pub async fn ack(&self, id: &str, queue: &str) -> Result<(), Error> {
        self.store.ack(id, queue).await?;
        self.metrics.inc_messages_acked(1, queue);
        Ok(())
    }

    pub async fn nack(&self, id: &str, queue: &str) -> Result<(), Error> {
        self.store.nack(id, queue).await?;
        self.metrics.inc_messages_nacked(1, queue);
        Ok(())
    }

    pub async fn requeue_all(&self, queue: &str) -> Result<u64, Error> {
        self.ensure_dlq(queue, "requeue")?;

        let rows = self.store.requeue_dlq_all(queue).await?;
        self.metrics
            .inc_messages_requeued(rows, regular_name_for(queue));
        Ok(rows)
    }

    pub async fn requeue_one(&self, id: &str, queue: &str) -> Result<(), Error> {
        self.ensure_dlq(queue, "requeue")?;

        self.store.requeue_dlq_one(id, queue).await?;
        self.metrics
            .inc_messages_requeued(1, regular_name_for(queue));
        Ok(())
    }

    pub async fn delete_all(&self, queue: &str) -> Result<u64, Error> {
        self.ensure_dlq(queue, "delete")?;

        let rows = self.store.delete_all(queue).await?;
        self.metrics
            .inc_messages_cleanup(rows, DELETED_BY_USER_CLEANUP_REASON);
        Ok(rows)
    }

    pub async fn delete_one(&self, id: &str, queue: &str) -> Result<(), Error> {
        self.ensure_dlq(queue, "delete")?;

        self.store.delete_dlq_one(id, queue).await?;
        self.metrics
            .inc_messages_cleanup(1, DELETED_BY_USER_CLEANUP_REASON);
        Ok(())
    }

    /// Fetches one row past the limit to decide whether another page exists.
    pub async fn browse(
        &self,
        queue: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<MessagePage, Error> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

        let mut messages = self.store.select_page(queue, cursor, limit + 1).await?;

        let has_more = messages.len() as i64 > limit;
        if has_more {
            messages.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            messages.last().map(|m| m.id.clone())
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
            has_more,
            queue: queue.to_owned(),
            is_dlq: is_dlq_name(queue),
        })
    }

    pub async fn details(&self, id: &str, queue: &str) -> Result<MessageDetails, Error> {
        self.store
            .select_details(id, queue)
            .await?
            .ok_or(Error::MessageNotFound)
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    fn ensure_dlq(&self, queue: &str, operation: &'static str) -> Result<(), Error> {
        if !is_dlq_name(queue) {
            tracing::warn!(
                queue,
                operation,
                "operation attempted on a non-DLQ queue, only DLQ queues are supported"
            );
            return Err(Error::DlqOnlyOperation);
        }
        Ok(())
    }
}

/// Aggregate statistics across queues for admin views.
pub struct QueueService {
    store: Arc<MessageStore>,
}

impl QueueService {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    pub async fn queues_overview(&self) -> Result<QueuesOverview, Error> {
        let queues = self.store.select_all_queue_stats().await?;

        let total_messages = queues.iter().map(|q| q.message_count).sum();
        let dlq_messages = queues
            .iter()
            .filter(|q| q.is_dlq)
            .map(|q| q.message_count)
            .sum();

        Ok(QueuesOverview {
            total_queues: queues.len(),
            total_messages,
            dlq_messages,
            queues,
        })
    }

    pub async fn queue_stats(&self, queue: &str) -> Result<Option<QueueStats>, Error> {
        self.store.select_queue_stats(queue).await
    }
}
