use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::{Job, JobStatus, JobStore, NewJob, StoreError, TransitionFields};
use crate::queue::{QueueMessage, QueueTransport, TransportError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),

    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("queue unavailable, job {job_id} was not enqueued: {source}")]
    Transport {
        job_id: Uuid,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn QueueTransport>,
    max_payload_bytes: usize,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn QueueTransport>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            store,
            transport,
            max_payload_bytes,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Validate, persist as `queued`, publish `{text, jobId}`.
    ///
    /// Returns once the message is published; extraction happens later.
    #[instrument(skip_all, fields(user = ?identity))]
    pub async fn submit(
        &self,
        req: SubmitRequest,
        identity: Option<&Identity>,
    ) -> Result<SubmitResponse, SubmitError> {
        if req.text.is_empty() {
            return Err(SubmitError::Validation("text must not be empty".to_string()));
        }
        if req.text.len() > self.max_payload_bytes {
            return Err(SubmitError::PayloadTooLarge {
                size: req.text.len(),
                limit: self.max_payload_bytes,
            });
        }

        let new = NewJob::new(req.text.clone()).submitted_by(identity.map(|i| i.to_string()));
        let job = self.store.create(new).await?;

        let message = QueueMessage {
            text: req.text,
            job_id: job.id,
        };

        if let Err(source) = self.transport.publish(&message).await {
            warn!(job_id = %job.id, error = %source, "publish failed");
            self.abandon(job.id, &source).await;
            return Err(SubmitError::Transport {
                job_id: job.id,
                source,
            });
        }

        info!(job_id = %job.id, bytes = message.text.len(), "job queued");
        Ok(SubmitResponse {
            job_id: job.id,
            status: JobStatus::Queued,
        })
    }

    /// The job will never be delivered; close it so it does not sit in `queued`.
    async fn abandon(&self, job_id: Uuid, cause: &TransportError) {
        let fields =
            TransitionFields::failed(ErrorCode::PublishFailed.as_str(), cause.to_string(), 0);
        if let Err(e) = self
            .store
            .transition(job_id, &[JobStatus::Queued], JobStatus::Failed, fields)
            .await
        {
            warn!(job_id = %job_id, error = %e, "could not mark unpublished job failed");
        }
    }

    /// Jobs submitted by a user are only visible to that user.
    pub async fn get_status(
        &self,
        job_id: Uuid,
        identity: Option<&Identity>,
    ) -> Result<Job, SubmitError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(SubmitError::NotFound(job_id))?;

        match job.submitted_by.as_deref() {
            Some(owner) if identity.map(Identity::as_str) != Some(owner) => {
                Err(SubmitError::NotFound(job_id))
            }
            _ => Ok(job),
        }
    }
}
