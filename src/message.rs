use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Suffix that marks a queue as the dead-letter sibling of a regular queue.
pub const DLQ_SUFFIX: &str = "-dlq";

pub const MAX_ATTEMPTS_REACHED_FAILURE_REASON: &str = "max_attempts_reached";
pub const MESSAGE_EXPIRED_FAILURE_REASON: &str = "message_expired";

/// Message delivery state.
///
/// Ready rows are claimable once `process_after` passes. Processing rows are
/// invisible until acked, nacked, or recovered as stale. Failed rows sit in a
/// regular queue waiting for the promotion sweep, or in a DLQ waiting for the
/// purge sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum MessageStatus {
    Ready = 0,
    Processing = 1,
    Failed = 2,
}

pub fn is_dlq_name(queue: &str) -> bool {
    queue.ends_with(DLQ_SUFFIX)
}

pub fn dlq_name_for(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}

/// The regular-queue name a DLQ feeds back into on requeue.
pub fn regular_name_for(dlq_queue: &str) -> &str {
    dlq_queue.strip_suffix(DLQ_SUFFIX).unwrap_or(dlq_queue)
}

/// A fully-specified row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub queue: String,
    pub content: String,
    pub process_after: i64,
    pub received_at: i64,
    pub updated_at: i64,
    pub expires_after: i64,
}

/// What a consumer receives from a successful claim.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ClaimedMessage {
    pub id: String,
    pub content: String,
}

/// Listing projection: everything but the payload, to keep pages cheap.
#[derive(Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub id: String,
    pub status: MessageStatus,
    pub attempts: i64,
    pub received_at: i64,
    pub process_after: i64,
}

/// Full single-message expansion for admin inspection.
#[derive(Debug, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetails {
    pub id: String,
    pub queue: String,
    pub is_dlq: bool,
    pub content: String,
    pub status: MessageStatus,
    pub attempts: i64,
    pub process_after: i64,
    pub processing_started_at: Option<i64>,
    pub failure_reason: Option<String>,
    pub received_at: i64,
    pub updated_at: i64,
    pub expires_after: i64,
}
