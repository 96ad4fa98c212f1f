//! Storage driver for the `messages` table.
//!
//! The store is the sole owner of message rows and the only synchronization
//! primitive in the engine: every state transition is a single atomic
//! statement (or a short transaction on the writer connection), so no
//! intermediate state is ever visible to another caller.
//!
//! All mutations go through a single-writer pool; reads go through a pool
//! sized to the CPU count. SQLite runs in WAL mode so readers never block
//! the writer.

use std::sync::Arc;

use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePoolOptions,
};
use sqlx::SqlitePool;
use tokio_stream::StreamExt as _;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Error;
use crate::message::{
    is_dlq_name, regular_name_for, ClaimedMessage, MessageDetails, MessageMetadata, MessageStatus,
    NewMessage, DLQ_SUFFIX, MAX_ATTEMPTS_REACHED_FAILURE_REASON, MESSAGE_EXPIRED_FAILURE_REASON,
};
use crate::queue::QueueStats;

pub struct MessageStore {
    writer: SqlitePool,
    reader: SqlitePool,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl MessageStore {
    pub async fn connect(config: Arc<Config>, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let opts = SqliteConnectOptions::new()
            .filename(config.db_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;

        let read_connections = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);

        let reader = SqlitePoolOptions::new()
            .max_connections(read_connections)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&writer).await?;

        Ok(Self {
            writer,
            reader,
            clock,
            config,
        })
    }

    pub async fn insert(&self, msg: &NewMessage) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT INTO messages
                (id, queue, is_dlq, content, status, attempts,
                 process_after, received_at, updated_at, expires_after)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9)
            ",
        )
        .bind(&msg.id)
        .bind(&msg.queue)
        .bind(is_dlq_name(&msg.queue))
        .bind(&msg.content)
        .bind(MessageStatus::Ready)
        .bind(msg.process_after)
        .bind(msg.received_at)
        .bind(msg.updated_at)
        .bind(msg.expires_after)
        .execute(&self.writer)
        .await?;

        Ok(())
    }

    /// Atomically claims the oldest ready message in the queue, marking it
    /// Processing and counting the attempt. Ties on `received_at` break on
    /// the smaller id.
    ///
    /// Expiry is intentionally not checked here: the promotion sweep owns
    /// `expires_after`, and a claim racing a just-passed expiry is harmless.
    pub async fn claim_one(&self, queue: &str) -> Result<Option<ClaimedMessage>, Error> {
        let now = self.clock.now_ms();

        Ok(sqlx::query_as(
            "
            UPDATE messages
            SET
                status = $1,
                attempts = attempts + 1,
                processing_started_at = $2,
                updated_at = $2
            WHERE id = (
                SELECT id
                FROM messages
                WHERE queue = $3
                  AND status = $4
                  AND process_after <= $2
                ORDER BY received_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, content
            ",
        )
        .bind(MessageStatus::Processing)
        .bind(now)
        .bind(queue)
        .bind(MessageStatus::Ready)
        .fetch_optional(&self.writer)
        .await?)
    }

    /// Consumer reported failure. The attempt was already counted by
    /// `claim_one`, so the row's current `attempts` decides the next state:
    /// exhausted rows park as Failed (the promotion sweep moves them to the
    /// DLQ), the rest return to Ready after the configured backoff delay.
    pub async fn nack(&self, id: &str, queue: &str) -> Result<(), Error> {
        let now = self.clock.now_ms();

        let mut tx = self.writer.begin().await?;

        let attempts: Option<i64> = sqlx::query_scalar(
            "SELECT attempts FROM messages WHERE id = $1 AND queue = $2 AND status = $3",
        )
        .bind(id)
        .bind(queue)
        .bind(MessageStatus::Processing)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            return Err(Error::MessageNotFound);
        };

        let (next_status, next_process_after) = if attempts >= self.config.max_delivery_attempts() {
            (MessageStatus::Failed, None)
        } else {
            let delay = backoff_delay_ms(self.config.backoff_delays_ms(), attempts);
            (MessageStatus::Ready, Some(now + delay))
        };

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                status = $1,
                process_after = COALESCE($2, process_after),
                processing_started_at = NULL,
                updated_at = $3
            WHERE id = $4 AND queue = $5 AND status = $6
            ",
        )
        .bind(next_status)
        .bind(next_process_after)
        .bind(now)
        .bind(id)
        .bind(queue)
        .bind(MessageStatus::Processing)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::MessageNotFound);
        }

        tx.commit().await?;

        Ok(())
    }

    /// Ack is idempotent: a row that is already gone (or no longer
    /// Processing) logs a warning and still counts as success.
    pub async fn ack(&self, id: &str, queue: &str) -> Result<(), Error> {
        let result =
            sqlx::query("DELETE FROM messages WHERE id = $1 AND queue = $2 AND status = $3")
                .bind(id)
                .bind(queue)
                .bind(MessageStatus::Processing)
                .execute(&self.writer)
                .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                queue,
                message_id = id,
                "no rows deleted on ack, message was either deleted already or does not exist"
            );
        }

        Ok(())
    }

    /// Rescues Processing rows whose consumer exceeded the visibility
    /// timeout. A stuck worker is presumed crashed, not overloaded, so
    /// recovered rows become claimable immediately and the attempt count is
    /// left alone; rows out of budget park as Failed.
    pub async fn recover_stale(&self) -> Result<u64, Error> {
        let now = self.clock.now_ms();
        let cutoff = now - self.config.max_processing_time_ms();

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                status = CASE WHEN attempts >= $1 THEN $2 ELSE $3 END,
                process_after = CASE WHEN attempts >= $1 THEN process_after ELSE $4 END,
                processing_started_at = NULL,
                updated_at = $4
            WHERE status = $5 AND processing_started_at < $6
            ",
        )
        .bind(self.config.max_delivery_attempts())
        .bind(MessageStatus::Failed)
        .bind(MessageStatus::Ready)
        .bind(now)
        .bind(MessageStatus::Processing)
        .bind(cutoff)
        .execute(&self.writer)
        .await?;

        Ok(result.rows_affected())
    }

    /// Moves every Failed row in a regular queue into its DLQ sibling with a
    /// fresh attempt budget and the DLQ TTL.
    pub async fn promote_failed(&self) -> Result<u64, Error> {
        let now = self.clock.now_ms();

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                queue = queue || $1,
                is_dlq = TRUE,
                status = $2,
                attempts = 0,
                process_after = $3,
                processing_started_at = NULL,
                failure_reason = $4,
                updated_at = $3,
                expires_after = $5
            WHERE status = $6 AND is_dlq = FALSE
            ",
        )
        .bind(DLQ_SUFFIX)
        .bind(MessageStatus::Ready)
        .bind(now)
        .bind(MAX_ATTEMPTS_REACHED_FAILURE_REASON)
        .bind(now + self.config.dlq_ttl_ms())
        .bind(MessageStatus::Failed)
        .execute(&self.writer)
        .await?;

        Ok(result.rows_affected())
    }

    /// Moves expired rows in regular queues into their DLQ siblings.
    /// Processing rows are exempt; stale recovery covers them.
    pub async fn promote_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now_ms();

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                queue = queue || $1,
                is_dlq = TRUE,
                status = $2,
                attempts = 0,
                process_after = $3,
                processing_started_at = NULL,
                failure_reason = $4,
                updated_at = $3,
                expires_after = $5
            WHERE status != $6 AND expires_after < $3 AND is_dlq = FALSE
            ",
        )
        .bind(DLQ_SUFFIX)
        .bind(MessageStatus::Ready)
        .bind(now)
        .bind(MESSAGE_EXPIRED_FAILURE_REASON)
        .bind(now + self.config.dlq_ttl_ms())
        .bind(MessageStatus::Processing)
        .execute(&self.writer)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes DLQ rows that exhausted their retry budget from within the
    /// DLQ. Terminal debris; nothing downstream to promote to.
    pub async fn purge_dlq_failed(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM messages WHERE status = $1 AND is_dlq = TRUE")
            .bind(MessageStatus::Failed)
            .execute(&self.writer)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn purge_dlq_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now_ms();

        let result = sqlx::query(
            "DELETE FROM messages WHERE status != $1 AND expires_after < $2 AND is_dlq = TRUE",
        )
        .bind(MessageStatus::Processing)
        .bind(now)
        .execute(&self.writer)
        .await?;

        Ok(result.rows_affected())
    }

    /// Moves every non-Processing row of a DLQ back to its regular queue
    /// with a fresh attempt budget and the regular-queue TTL.
    pub async fn requeue_dlq_all(&self, queue: &str) -> Result<u64, Error> {
        let now = self.clock.now_ms();

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                queue = $1,
                is_dlq = FALSE,
                status = $2,
                attempts = 0,
                process_after = $3,
                processing_started_at = NULL,
                failure_reason = NULL,
                updated_at = $3,
                expires_after = $4
            WHERE queue = $5 AND status != $6
            ",
        )
        .bind(regular_name_for(queue))
        .bind(MessageStatus::Ready)
        .bind(now)
        .bind(now + self.config.queue_ttl_ms())
        .bind(queue)
        .bind(MessageStatus::Processing)
        .execute(&self.writer)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn requeue_dlq_one(&self, id: &str, queue: &str) -> Result<(), Error> {
        let now = self.clock.now_ms();

        let result = sqlx::query(
            "
            UPDATE messages
            SET
                queue = $1,
                is_dlq = FALSE,
                status = $2,
                attempts = 0,
                process_after = $3,
                processing_started_at = NULL,
                failure_reason = NULL,
                updated_at = $3,
                expires_after = $4
            WHERE id = $5 AND queue = $6 AND status != $7
            ",
        )
        .bind(regular_name_for(queue))
        .bind(MessageStatus::Ready)
        .bind(now)
        .bind(now + self.config.queue_ttl_ms())
        .bind(id)
        .bind(queue)
        .bind(MessageStatus::Processing)
        .execute(&self.writer)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::MessageNotFound);
        }

        Ok(())
    }

    pub async fn delete_dlq_one(&self, id: &str, queue: &str) -> Result<(), Error> {
        let result =
            sqlx::query("DELETE FROM messages WHERE id = $1 AND queue = $2 AND is_dlq = TRUE")
                .bind(id)
                .bind(queue)
                .execute(&self.writer)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::MessageNotFound);
        }

        Ok(())
    }

    /// Unconditional purge of a queue. The DLQ-only restriction lives in the
    /// message service, not here.
    pub async fn delete_all(&self, queue: &str) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM messages WHERE queue = $1")
            .bind(queue)
            .execute(&self.writer)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn select_metadata(
        &self,
        id: &str,
        queue: &str,
    ) -> Result<Option<MessageMetadata>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT id, status, attempts, received_at, process_after
            FROM messages
            WHERE id = $1 AND queue = $2
            ",
        )
        .bind(id)
        .bind(queue)
        .fetch_optional(&self.reader)
        .await?)
    }

    pub async fn select_details(
        &self,
        id: &str,
        queue: &str,
    ) -> Result<Option<MessageDetails>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT id, queue, is_dlq, content, status, attempts, process_after,
                   processing_started_at, failure_reason, received_at, updated_at, expires_after
            FROM messages
            WHERE id = $1 AND queue = $2
            ",
        )
        .bind(id)
        .bind(queue)
        .fetch_optional(&self.reader)
        .await?)
    }

    /// Pages newest-first by id; ids are time-ordered so this walks backwards
    /// through arrival order. A non-empty cursor selects `id < cursor`.
    pub async fn select_page(
        &self,
        queue: &str,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MessageMetadata>, Error> {
        let mut conn = self.reader.acquire().await?;

        let mut stream = match cursor {
            Some(cursor) => sqlx::query_as(
                "
                SELECT id, status, attempts, received_at, process_after
                FROM messages
                WHERE queue = $1 AND id < $2
                ORDER BY id DESC
                LIMIT $3
                ",
            )
            .bind(queue)
            .bind(cursor)
            .bind(limit)
            .fetch(&mut *conn),
            None => sqlx::query_as(
                "
                SELECT id, status, attempts, received_at, process_after
                FROM messages
                WHERE queue = $1
                ORDER BY id DESC
                LIMIT $2
                ",
            )
            .bind(queue)
            .bind(limit)
            .fetch(&mut *conn),
        };

        let mut messages = Vec::new();

        while let Some(row) = stream.next().await.transpose()? {
            messages.push(row);
        }

        Ok(messages)
    }

    pub async fn select_all_queue_stats(&self) -> Result<Vec<QueueStats>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT queue AS name, is_dlq, COUNT(*) AS message_count
            FROM messages
            GROUP BY queue, is_dlq
            ORDER BY queue
            ",
        )
        .fetch_all(&self.reader)
        .await?)
    }

    pub async fn select_queue_stats(&self, queue: &str) -> Result<Option<QueueStats>, Error> {
        Ok(sqlx::query_as(
            "
            SELECT queue AS name, is_dlq, COUNT(*) AS message_count
            FROM messages
            WHERE queue = $1
            GROUP BY queue, is_dlq
            ",
        )
        .bind(queue)
        .fetch_optional(&self.reader)
        .await?)
    }

    pub async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1").execute(&self.reader).await?;
        Ok(())
    }

    /// Opportunistic store-level maintenance, run from a background loop.
    pub async fn optimize(&self) -> Result<(), Error> {
        sqlx::query("PRAGMA optimize").execute(&self.writer).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

/// Delay for the k-th failed attempt (1-indexed); attempts past the end of
/// the schedule reuse the last entry.
fn backoff_delay_ms(delays: &[i64], attempt: i64) -> i64 {
    let idx = (attempt.max(1) as usize).min(delays.len()) - 1;
    delays[idx]
}
