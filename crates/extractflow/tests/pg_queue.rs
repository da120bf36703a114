mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_options, setup_db, CountingExtractor};
use extractflow::consumer::QueueConsumer;
use extractflow::jobs::{JobStatus, JobStore, JobsRepo};
use extractflow::queue::{
    PgQueue, QueueMessage, QueueSource, QueueTransport, Settlement, TransportError,
};
use extractflow::submission::{SubmissionService, SubmitRequest};
use serial_test::serial;
use uuid::Uuid;

fn msg(text: &str) -> QueueMessage {
    QueueMessage {
        text: text.to_string(),
        job_id: Uuid::new_v4(),
    }
}

#[tokio::test]
#[serial]
async fn pg_lease_is_exclusive_and_expires() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let q = PgQueue::new(pool, "extract");
    q.publish(&msg("a")).await.unwrap();

    let a = q.receive("c-a", 10, Duration::ZERO).await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].attempts, 1);
    assert!(q.receive("c-b", 10, Duration::from_secs(30)).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(q.reclaim_expired().await.unwrap(), 1);

    let b = q.receive("c-b", 10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(b[0].id, a[0].id);
    assert_eq!(b[0].attempts, 2);

    let err = q.settle(a[0].id, "c-a", &Settlement::Ack).await.unwrap_err();
    assert!(matches!(err, TransportError::LeaseLost(_)));
    q.settle(b[0].id, "c-b", &Settlement::Ack).await.unwrap();

    assert_eq!(q.depth().await.unwrap(), (0, 0, 0));
}

#[tokio::test]
#[serial]
async fn pg_retry_delay_and_dead_letter() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let q = PgQueue::new(pool, "extract");
    q.publish(&msg("a")).await.unwrap();
    q.publish(&msg("b")).await.unwrap();

    let batch = q.receive("c", 10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(batch.len(), 2);

    q.settle(
        batch[0].id,
        "c",
        &Settlement::Retry {
            delay: Duration::from_secs(60),
        },
    )
    .await
    .unwrap();
    q.settle(batch[1].id, "c", &Settlement::dead_letter("BAD_MESSAGE"))
        .await
        .unwrap();

    // delayed message is not visible yet
    assert!(q.receive("c", 10, Duration::from_secs(30)).await.unwrap().is_empty());
    assert_eq!(q.depth().await.unwrap(), (1, 0, 1));

    let dead = q.list_dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, batch[1].id);
    assert_eq!(dead[0].dlq_reason.as_deref(), Some("BAD_MESSAGE"));
}

#[tokio::test]
#[serial]
async fn pg_submit_and_consume_end_to_end() {
    let Some(pool) = setup_db().await else {
        return;
    };
    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool.clone()));
    let queue = Arc::new(PgQueue::new(pool, "extract"));
    let submissions = SubmissionService::new(store.clone(), queue.clone(), 4096);

    let resp = submissions
        .submit(
            SubmitRequest {
                text: "hello world".into(),
            },
            None,
        )
        .await
        .unwrap();

    let consumer = QueueConsumer::new(
        store.clone(),
        Arc::new(CountingExtractor::default()),
        fast_options(),
    );
    assert_eq!(consumer.poll_once(queue.as_ref()).await.unwrap(), 1);

    let job = store.get(resp.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.result.is_some());
    assert_eq!(queue.depth().await.unwrap(), (0, 0, 0));
}
