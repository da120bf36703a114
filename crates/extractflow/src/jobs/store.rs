//! Job record store contract.
//!
//! `transition` is a compare-and-swap on the job status and is the only
//! synchronization between consumers: whichever delivery moves a job out of
//! `processing` first owns the terminal state, every later attempt sees
//! `Conflict`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::model::{Job, JobStatus, NewJob, TransitionFields};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    AlreadyExists(Uuid),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is {current}, expected one of {expected:?}")]
    Conflict {
        id: Uuid,
        current: JobStatus,
        expected: Vec<JobStatus>,
    },

    #[error("invalid transition for job {id}: {reason}")]
    InvalidTransition { id: Uuid, reason: String },

    #[error("corrupt job row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `queued` job. Fails with `AlreadyExists` on a duplicate id.
    async fn create(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Move the job to `to` if its current status is in `from`.
    ///
    /// On `Conflict` the record is left untouched.
    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, StoreError>;
}

/// Checks shared by every store before it touches the record.
pub(crate) fn check_request(
    id: Uuid,
    from: &[JobStatus],
    to: JobStatus,
    fields: &TransitionFields,
) -> Result<(), StoreError> {
    if from.is_empty() {
        return Err(StoreError::InvalidTransition {
            id,
            reason: "empty source status set".to_string(),
        });
    }
    if let Some(bad) = from.iter().find(|s| !s.can_transition_to(to)) {
        return Err(StoreError::InvalidTransition {
            id,
            reason: format!("{bad} -> {to} is not a lifecycle edge"),
        });
    }
    if !fields.fits(to) {
        return Err(StoreError::InvalidTransition {
            id,
            reason: format!("result/error fields do not match target status {to}"),
        });
    }
    Ok(())
}
