use extractflow::jobs::{InMemoryJobStore, JobStatus, JobStore, NewJob, StoreError, TransitionFields};
use serde_json::json;

#[tokio::test]
async fn create_is_queued_and_rejects_duplicate_ids() {
    let store = InMemoryJobStore::new();
    let new = NewJob::new("hello world");
    let id = new.id;

    let job = store.create(new.clone()).await.unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 0);

    let err = store.create(new).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(x) if x == id));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn conflicting_transition_leaves_record_unchanged() {
    let store = InMemoryJobStore::new();
    let job = store.create(NewJob::new("t")).await.unwrap();

    let err = store
        .transition(
            job.id,
            &[JobStatus::Processing],
            JobStatus::Succeeded,
            TransitionFields::succeeded(json!({"x": 1})),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(matches!(err, StoreError::Conflict { current: JobStatus::Queued, .. }));

    let after = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Queued);
    assert_eq!(after.result, None);
    assert_eq!(after.updated_at, job.updated_at);
}

#[tokio::test]
async fn lifecycle_edges_are_enforced() {
    let store = InMemoryJobStore::new();
    let job = store.create(NewJob::new("t")).await.unwrap();

    // queued cannot jump straight to succeeded
    let err = store
        .transition(
            job.id,
            &[JobStatus::Queued],
            JobStatus::Succeeded,
            TransitionFields::succeeded(json!({})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    // result without succeeded
    let err = store
        .transition(
            job.id,
            &[JobStatus::Queued],
            JobStatus::Processing,
            TransitionFields::succeeded(json!({})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let err = store
        .transition(job.id, &[], JobStatus::Processing, TransitionFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn terminal_jobs_do_not_move() {
    let store = InMemoryJobStore::new();
    let job = store.create(NewJob::new("t")).await.unwrap();

    store
        .transition(job.id, &[JobStatus::Queued], JobStatus::Processing, TransitionFields::default())
        .await
        .unwrap();
    let done = store
        .transition(
            job.id,
            &[JobStatus::Processing],
            JobStatus::Succeeded,
            TransitionFields::succeeded(json!({"ok": true})),
        )
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);

    let err = store
        .transition(
            job.id,
            &[JobStatus::Processing],
            JobStatus::Failed,
            TransitionFields::failed("TIMEOUT", "late", 0),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    let after = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(after.result, Some(json!({"ok": true})));
    assert!(after.error.is_none());
}

#[tokio::test]
async fn requeue_bumps_retry_count() {
    let store = InMemoryJobStore::new();
    let job = store.create(NewJob::new("t")).await.unwrap();

    store
        .transition(job.id, &[JobStatus::Queued], JobStatus::Processing, TransitionFields::default())
        .await
        .unwrap();
    let requeued = store
        .transition(
            job.id,
            &[JobStatus::Processing],
            JobStatus::Queued,
            TransitionFields::requeued(1),
        )
        .await
        .unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);
    assert_eq!(requeued.retry_count, 1);
}

#[tokio::test]
async fn missing_job_is_not_found() {
    let store = InMemoryJobStore::new();
    let id = uuid::Uuid::new_v4();
    assert!(store.get(id).await.unwrap().is_none());

    let err = store
        .transition(id, &[JobStatus::Queued], JobStatus::Processing, TransitionFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(x) if x == id));
}
