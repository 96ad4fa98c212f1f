use std::sync::Arc;

use forq::clock::{Clock, ManualClock};
use forq::config::Config;
use forq::error::Error;
use forq::message::{MessageStatus, MAX_ATTEMPTS_REACHED_FAILURE_REASON};
use forq::metrics::NoopMetrics;
use forq::service::{MessageService, NewMessageRequest, QueueService};
use forq::store::MessageStore;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

struct TestBroker {
    store: Arc<MessageStore>,
    messages: MessageService,
    queues: QueueService,
    clock: Arc<ManualClock>,
    _tmpdir: TempDir,
}

async fn setup() -> TestBroker {
    setup_with(Config::default()).await
}

async fn setup_with(mut config: Config) -> TestBroker {
    let tmpdir = tempfile::tempdir().unwrap();

    config.db_path = Some(
        tmpdir
            .path()
            .join("forq.db")
            .to_string_lossy()
            .to_string(),
    );
    let config = Arc::new(config);

    let clock = Arc::new(ManualClock::new(T0));
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let store = Arc::new(
        MessageStore::connect(config.clone(), clock_dyn.clone())
            .await
            .unwrap(),
    );

    TestBroker {
        messages: MessageService::new(
            store.clone(),
            Arc::new(NoopMetrics),
            clock_dyn,
            config.clone(),
        ),
        queues: QueueService::new(store.clone()),
        store,
        clock,
        _tmpdir: tmpdir,
    }
}

impl TestBroker {
    async fn produce(&self, queue: &str, content: &str) {
        self.messages
            .produce(
                queue,
                NewMessageRequest {
                    content: content.to_owned(),
                    process_after: 0,
                },
            )
            .await
            .unwrap();
    }

    /// Claims and nacks until the retry budget is spent and the row parks as
    /// Failed, advancing past each backoff delay along the way.
    async fn exhaust_attempts(&self, queue: &str) -> String {
        let mut id = String::new();
        for _ in 0..5 {
            self.clock.advance_ms(61_000);
            let claimed = self.store.claim_one(queue).await.unwrap().unwrap();
            id = claimed.id;
            self.messages.nack(&id, queue).await.unwrap();
        }
        id
    }
}

#[tokio::test]
async fn produce_claim_ack_round_trip() {
    let broker = setup().await;

    broker.produce("q1", "hi").await;

    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();
    assert_eq!(claimed.content, "hi");

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Processing);
    assert_eq!(details.attempts, 1);
    assert_eq!(details.processing_started_at, Some(T0));

    // the metadata projection carries the same state without the payload
    let metadata = broker
        .store
        .select_metadata(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.status, MessageStatus::Processing);
    assert_eq!(metadata.received_at, T0);

    broker.messages.ack(&claimed.id, "q1").await.unwrap();
    assert!(broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .is_none());

    // ack is idempotent: a second ack of the deleted row still succeeds
    broker.messages.ack(&claimed.id, "q1").await.unwrap();
}

#[tokio::test]
async fn claim_prefers_oldest_received() {
    let broker = setup().await;

    broker.produce("q1", "first").await;
    broker.clock.advance_ms(10);
    broker.produce("q1", "second").await;

    let a = broker.store.claim_one("q1").await.unwrap().unwrap();
    let b = broker.store.claim_one("q1").await.unwrap().unwrap();
    assert_eq!(a.content, "first");
    assert_eq!(b.content, "second");

    assert!(broker.store.claim_one("q1").await.unwrap().is_none());
}

#[tokio::test]
async fn claim_ignores_future_messages() {
    let broker = setup().await;

    broker
        .messages
        .produce(
            "q1",
            NewMessageRequest {
                content: "later".to_owned(),
                process_after: T0 + 5_000,
            },
        )
        .await
        .unwrap();

    assert!(broker.store.claim_one("q1").await.unwrap().is_none());

    broker.clock.advance_ms(5_000);
    assert!(broker.store.claim_one("q1").await.unwrap().is_some());
}

#[tokio::test]
async fn nack_applies_backoff_schedule() {
    let broker = setup().await;

    broker.produce("q1", "retry me").await;

    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();
    broker.messages.nack(&claimed.id, "q1").await.unwrap();

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Ready);
    assert_eq!(details.attempts, 1);
    assert_eq!(details.process_after, T0 + 1_000);
    assert_eq!(details.processing_started_at, None);

    // second failed attempt backs off by the next entry in the schedule
    broker.clock.advance_ms(1_000);
    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();
    broker.messages.nack(&claimed.id, "q1").await.unwrap();

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.attempts, 2);
    assert_eq!(details.process_after, broker.clock.now_ms() + 5_000);
}

#[tokio::test]
async fn nack_of_unclaimed_message_is_not_found() {
    let broker = setup().await;

    broker.produce("q1", "ready").await;
    let page = broker.store.select_page("q1", None, 1).await.unwrap();
    let id = page[0].id.clone();

    // the row is Ready, not Processing, so a nack has nothing to release
    let err = broker.messages.nack(&id, "q1").await.unwrap_err();
    assert!(matches!(err, Error::MessageNotFound));

    let err = broker.messages.nack("no-such-id", "q1").await.unwrap_err();
    assert!(matches!(err, Error::MessageNotFound));
}

#[tokio::test]
async fn exhausted_message_is_promoted_to_dlq() {
    let broker = setup().await;

    broker.produce("q1", "doomed").await;
    let id = broker.exhaust_attempts("q1").await;

    let details = broker
        .store
        .select_details(&id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Failed);
    assert_eq!(details.attempts, 5);

    let promoted = broker.store.promote_failed().await.unwrap();
    assert_eq!(promoted, 1);

    assert!(broker.store.select_details(&id, "q1").await.unwrap().is_none());

    let details = broker
        .store
        .select_details(&id, "q1-dlq")
        .await
        .unwrap()
        .unwrap();
    assert!(details.is_dlq);
    assert_eq!(details.status, MessageStatus::Ready);
    assert_eq!(details.attempts, 0);
    assert_eq!(
        details.failure_reason.as_deref(),
        Some(MAX_ATTEMPTS_REACHED_FAILURE_REASON)
    );
    assert_eq!(details.expires_after, broker.clock.now_ms() + 7 * DAY_MS);
}

#[tokio::test]
async fn expired_message_is_promoted_to_dlq() {
    let broker = setup().await;

    broker.produce("q1", "stale news").await;
    let id = broker.store.select_page("q1", None, 1).await.unwrap()[0]
        .id
        .clone();

    broker.clock.advance_ms(DAY_MS + 1);

    let promoted = broker.store.promote_expired().await.unwrap();
    assert_eq!(promoted, 1);

    let details = broker
        .store
        .select_details(&id, "q1-dlq")
        .await
        .unwrap()
        .unwrap();
    assert!(details.is_dlq);
    assert_eq!(details.failure_reason.as_deref(), Some("message_expired"));
}

#[tokio::test]
async fn expired_promotion_exempts_processing_rows() {
    let broker = setup().await;

    broker.produce("q1", "in flight").await;
    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();

    broker.clock.advance_ms(DAY_MS + 1);
    assert_eq!(broker.store.promote_expired().await.unwrap(), 0);

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Processing);
}

#[tokio::test]
async fn stale_processing_row_is_recovered() {
    let broker = setup().await;

    broker.produce("q1", "abandoned").await;
    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();

    // within the visibility timeout nothing happens
    broker.clock.advance_ms(29_000);
    assert_eq!(broker.store.recover_stale().await.unwrap(), 0);

    broker.clock.advance_ms(2_000);
    assert_eq!(broker.store.recover_stale().await.unwrap(), 1);

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Ready);
    assert_eq!(details.attempts, 1);
    assert_eq!(details.process_after, broker.clock.now_ms());
    assert_eq!(details.processing_started_at, None);
}

#[tokio::test]
async fn stale_recovery_fails_exhausted_rows() {
    let broker = setup().await;

    broker.produce("q1", "doomed").await;

    for _ in 0..4 {
        broker.clock.advance_ms(61_000);
        let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();
        broker.messages.nack(&claimed.id, "q1").await.unwrap();
    }

    broker.clock.advance_ms(61_000);
    let claimed = broker.store.claim_one("q1").await.unwrap().unwrap();

    broker.clock.advance_ms(31_000);
    assert_eq!(broker.store.recover_stale().await.unwrap(), 1);

    let details = broker
        .store
        .select_details(&claimed.id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, MessageStatus::Failed);
    assert_eq!(details.attempts, 5);
    assert_eq!(details.processing_started_at, None);
}

#[tokio::test]
async fn produce_validates_content_size() {
    let broker = setup_with(Config {
        message_content_max_size_bytes: Some(8),
        ..Config::default()
    })
    .await;

    broker.produce("q1", "12345678").await;

    let err = broker
        .messages
        .produce(
            "q1",
            NewMessageRequest {
                content: "123456789".to_owned(),
                process_after: 0,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContentExceedsLimit));
}

#[tokio::test]
async fn produce_validates_process_after_window() {
    let broker = setup().await;

    // inside the clock-skew buffer
    broker
        .messages
        .produce(
            "q1",
            NewMessageRequest {
                content: "slightly late".to_owned(),
                process_after: T0 - 5_000,
            },
        )
        .await
        .unwrap();

    let err = broker
        .messages
        .produce(
            "q1",
            NewMessageRequest {
                content: "too late".to_owned(),
                process_after: T0 - 20_000,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessAfterInPast));

    let err = broker
        .messages
        .produce(
            "q1",
            NewMessageRequest {
                content: "too far".to_owned(),
                process_after: T0 + 367 * DAY_MS,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessAfterTooFar));
}

#[tokio::test]
async fn fetch_long_polls_until_budget_expires() {
    let broker = setup_with(Config {
        polling_duration_ms: Some(200),
        ..Config::default()
    })
    .await;

    assert!(broker.messages.fetch("q1").await.unwrap().is_none());

    broker.produce("q1", "hi").await;
    let fetched = broker.messages.fetch("q1").await.unwrap().unwrap();
    assert_eq!(fetched.content, "hi");
}

#[tokio::test]
async fn requeue_is_restricted_to_dlqs() {
    let broker = setup().await;

    let err = broker.messages.requeue_all("q1").await.unwrap_err();
    assert!(matches!(err, Error::DlqOnlyOperation));

    let err = broker.messages.requeue_one("some-id", "q1").await.unwrap_err();
    assert!(matches!(err, Error::DlqOnlyOperation));

    let err = broker.messages.delete_all("q1").await.unwrap_err();
    assert!(matches!(err, Error::DlqOnlyOperation));

    let err = broker.messages.delete_one("some-id", "q1").await.unwrap_err();
    assert!(matches!(err, Error::DlqOnlyOperation));
}

#[tokio::test]
async fn requeue_returns_message_to_regular_queue() {
    let broker = setup().await;

    broker.produce("q1", "second chance").await;
    let id = broker.exhaust_attempts("q1").await;
    broker.store.promote_failed().await.unwrap();

    let requeued = broker.messages.requeue_all("q1-dlq").await.unwrap();
    assert_eq!(requeued, 1);

    let details = broker
        .store
        .select_details(&id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert!(!details.is_dlq);
    assert_eq!(details.status, MessageStatus::Ready);
    assert_eq!(details.attempts, 0);
    assert_eq!(details.failure_reason, None);
    assert_eq!(details.expires_after, broker.clock.now_ms() + DAY_MS);

    // and the message is claimable again right away
    assert!(broker.store.claim_one("q1").await.unwrap().is_some());
}

#[tokio::test]
async fn requeue_one_unknown_message_is_not_found() {
    let broker = setup().await;

    let err = broker
        .messages
        .requeue_one("no-such-id", "q1-dlq")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MessageNotFound));
}

#[tokio::test]
async fn delete_one_removes_dlq_message() {
    let broker = setup().await;

    broker.produce("q1", "junk").await;
    let id = broker.exhaust_attempts("q1").await;
    broker.store.promote_failed().await.unwrap();

    broker.messages.delete_one(&id, "q1-dlq").await.unwrap();
    assert!(broker
        .store
        .select_details(&id, "q1-dlq")
        .await
        .unwrap()
        .is_none());

    let err = broker.messages.delete_one(&id, "q1-dlq").await.unwrap_err();
    assert!(matches!(err, Error::MessageNotFound));
}

#[tokio::test]
async fn dlq_purges_remove_expired_and_failed_rows() {
    let broker = setup().await;

    // a message that exhausts its budget from within the DLQ parks as Failed
    broker.produce("jobs-dlq", "trouble").await;
    broker.exhaust_attempts("jobs-dlq").await;
    assert_eq!(broker.store.purge_dlq_failed().await.unwrap(), 1);

    // an expired DLQ row is purged outright
    broker.produce("mail-dlq", "old").await;
    broker.clock.advance_ms(DAY_MS + 1);
    assert_eq!(broker.store.purge_dlq_expired().await.unwrap(), 1);

    let overview = broker.queues.queues_overview().await.unwrap();
    assert_eq!(overview.total_messages, 0);
}

#[tokio::test]
async fn browse_paginates_newest_first() {
    let broker = setup().await;

    for i in 0..5 {
        broker.produce("q1", &format!("m{i}")).await;
        broker.clock.advance_ms(1);
    }

    let page = broker.messages.browse("q1", None, Some(2)).await.unwrap();
    assert_eq!(page.messages.len(), 2);
    assert!(page.has_more);
    assert!(!page.is_dlq);
    let cursor = page.next_cursor.clone().unwrap();

    // ids are time-ordered, so newest-first means descending ids
    assert!(page.messages[0].id > page.messages[1].id);

    let page2 = broker
        .messages
        .browse("q1", Some(&cursor), Some(2))
        .await
        .unwrap();
    assert_eq!(page2.messages.len(), 2);
    assert!(page2.messages[0].id < cursor);
    assert!(page2.has_more);

    let page3 = broker
        .messages
        .browse("q1", page2.next_cursor.as_deref(), Some(2))
        .await
        .unwrap();
    assert_eq!(page3.messages.len(), 1);
    assert!(!page3.has_more);
    assert_eq!(page3.next_cursor, None);
}

#[tokio::test]
async fn message_details_reports_not_found() {
    let broker = setup().await;

    let err = broker.messages.details("nope", "q1").await.unwrap_err();
    assert!(matches!(err, Error::MessageNotFound));
}

#[tokio::test]
async fn queue_stats_aggregate_by_queue_and_type() {
    let broker = setup().await;

    broker.produce("q1", "a").await;
    broker.produce("q1", "b").await;
    broker.produce("q2-dlq", "c").await;

    let overview = broker.queues.queues_overview().await.unwrap();
    assert_eq!(overview.total_queues, 2);
    assert_eq!(overview.total_messages, 3);
    assert_eq!(overview.dlq_messages, 1);

    let q1 = broker.queues.queue_stats("q1").await.unwrap().unwrap();
    assert_eq!(q1.message_count, 2);
    assert!(!q1.is_dlq);

    let dlq = broker.queues.queue_stats("q2-dlq").await.unwrap().unwrap();
    assert_eq!(dlq.message_count, 1);
    assert!(dlq.is_dlq);

    assert!(broker.queues.queue_stats("empty").await.unwrap().is_none());
}

#[tokio::test]
async fn store_is_healthy_until_closed() {
    let broker = setup().await;

    assert!(broker.messages.is_healthy().await);

    broker.store.close().await;
    assert!(!broker.messages.is_healthy().await);
}
