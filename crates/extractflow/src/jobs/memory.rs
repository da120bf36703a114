use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::jobs::model::{Job, JobStatus, NewJob, TransitionFields};
use crate::jobs::store::{check_request, JobStore, StoreError};

/// In-memory job store.
///
/// Intended for tests/dev. The write lock makes each transition atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(id: Uuid) -> StoreError {
    StoreError::Corrupt {
        id,
        reason: "lock poisoned".to_string(),
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned(new.id))?;
        if jobs.contains_key(&new.id) {
            return Err(StoreError::AlreadyExists(new.id));
        }

        let now = Utc::now();
        let job = Job {
            id: new.id,
            payload: new.payload,
            status: JobStatus::Queued,
            result: None,
            error: None,
            retry_count: 0,
            submitted_by: new.submitted_by,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned(id))?;
        Ok(jobs.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, StoreError> {
        check_request(id, from, to, &fields)?;

        let mut jobs = self.jobs.write().map_err(|_| poisoned(id))?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !from.contains(&job.status) {
            return Err(StoreError::Conflict {
                id,
                current: job.status,
                expected: from.to_vec(),
            });
        }

        job.status = to;
        job.result = fields.result;
        job.error = fields.error;
        if let Some(n) = fields.retry_count {
            job.retry_count = n;
        }
        job.updated_at = Utc::now();

        Ok(job.clone())
    }
}
