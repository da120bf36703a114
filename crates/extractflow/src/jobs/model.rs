use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Edges of the job lifecycle.
    ///
    /// `processing -> processing` is a redelivered message taking over from a
    /// consumer whose lease expired. `processing -> queued` is the explicit
    /// retry requeue. `queued -> failed` covers jobs that never reached a
    /// consumer (publish failure, delivery budget exhausted).
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Processing)
                | (Processing, Queued)
                | (Processing, Succeeded)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub code: String,
    pub message: String,
    pub retry_count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub payload: String,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<JobFailure>,
    pub retry_count: i32,
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub payload: String,
    pub submitted_by: Option<String>,
}

impl NewJob {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            submitted_by: None,
        }
    }

    pub fn submitted_by(mut self, who: Option<String>) -> Self {
        self.submitted_by = who;
        self
    }
}

/// Fields written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub result: Option<Value>,
    pub error: Option<JobFailure>,
    pub retry_count: Option<i32>,
}

impl TransitionFields {
    pub fn succeeded(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(code: &str, message: impl Into<String>, retry_count: i32) -> Self {
        Self {
            error: Some(JobFailure {
                code: code.to_string(),
                message: message.into(),
                retry_count,
            }),
            retry_count: Some(retry_count),
            ..Self::default()
        }
    }

    pub fn requeued(retry_count: i32) -> Self {
        Self {
            retry_count: Some(retry_count),
            ..Self::default()
        }
    }

    /// `result` only accompanies `succeeded`, `error` only `failed`.
    pub fn fits(&self, to: JobStatus) -> bool {
        (self.result.is_none() || to == JobStatus::Succeeded)
            && (self.error.is_none() || to == JobStatus::Failed)
    }
}

/// The RPC view of a job. The payload stays server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<JobFailure>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result,
            error: job.error,
            retry_count: job.retry_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
