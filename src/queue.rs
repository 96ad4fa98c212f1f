//! Queue statistics for admin views.
//!
//! Queues in Forq are implicit: a queue exists exactly while it has rows in
//! the `messages` table, so statistics are aggregates over that table rather
//! than rows of their own.

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Per-queue aggregate, one row per `(queue, is_dlq)` group.
#[derive(Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Queue name, DLQ suffix included for dead-letter queues.
    pub name: String,
    pub is_dlq: bool,
    /// Messages currently in the queue, regardless of status.
    pub message_count: i64,
}

/// Dashboard-style rollup across every queue in the store.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesOverview {
    pub total_queues: usize,
    pub total_messages: i64,
    pub dlq_messages: i64,
    pub queues: Vec<QueueStats>,
}
