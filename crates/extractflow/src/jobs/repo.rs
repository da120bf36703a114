// crates/extractflow/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::model::{Job, JobFailure, JobStatus, NewJob, TransitionFields};
use crate::jobs::store::{check_request, JobStore, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    payload_text: String,
    status: String,
    result_json: Option<Value>,
    error_code: Option<String>,
    error_message: Option<String>,
    retry_count: i32,
    submitted_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| StoreError::Corrupt {
            id: row.id,
            reason: format!("unknown status {:?}", row.status),
        })?;

        let error = match (row.error_code, row.error_message) {
            (Some(code), message) => Some(JobFailure {
                code,
                message: message.unwrap_or_default(),
                retry_count: row.retry_count,
            }),
            (None, _) => None,
        };

        Ok(Job {
            id: row.id,
            payload: row.payload_text,
            status,
            result: row.result_json,
            error,
            retry_count: row.retry_count,
            submitted_by: row.submitted_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed job record store.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| {
                JobStatus::parse(&s).ok_or_else(|| StoreError::Corrupt {
                    id,
                    reason: format!("unknown status {s:?}"),
                })
            })
            .transpose()
    }

    /// Returns: (queued, processing, succeeded, failed)
    pub async fn status_counts(&self) -> Result<(i64, i64, i64, i64), StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = (0, 0, 0, 0);
        for (status, n) in rows {
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => counts.0 = n,
                Some(JobStatus::Processing) => counts.1 = n,
                Some(JobStatus::Succeeded) => counts.2 = n,
                Some(JobStatus::Failed) => counts.3 = n,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl JobStore for JobsRepo {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let res = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, payload_text, status, submitted_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.payload)
        .bind(JobStatus::Queued.as_str())
        .bind(&job.submitted_by)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::AlreadyExists(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, StoreError> {
        check_request(id, from, to, &fields)?;

        let from_strs: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let (error_code, error_message) = match fields.error {
            Some(f) => (Some(f.code), Some(f.message)),
            None => (None, None),
        };

        // Single statement: the status guard and the write are atomic.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = $3,
                result_json = $4,
                error_code = $5,
                error_message = $6,
                retry_count = COALESCE($7, retry_count),
                updated_at = now()
            WHERE id = $1
              AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&from_strs)
        .bind(to.as_str())
        .bind(fields.result)
        .bind(error_code)
        .bind(error_message)
        .bind(fields.retry_count)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => match self.current_status(id).await? {
                Some(current) => Err(StoreError::Conflict {
                    id,
                    current,
                    expected: from.to_vec(),
                }),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }
}
