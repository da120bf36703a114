//! Typed HTTP client for the job RPCs.
//!
//! Credentials come from a [`CredentialProvider`] handed to the client at
//! construction, so every request reads the current token from its owner.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::api::models::{ErrorBody, JobView, SubmitRequest, SubmitResponse};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `None` sends the request anonymously.
    async fn bearer_token(&self) -> anyhow::Result<Option<String>>;
}

/// A fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("credential provider failed: {0}")]
    Credentials(#[source] anyhow::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status} {}: {}", .body.error, .body.message)]
    Api { status: StatusCode, body: ErrorBody },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            ClientError::Credentials(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ExtractflowClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ExtractflowClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn authorized(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(ClientError::Credentials)?;
        Ok(match token {
            Some(t) => req.bearer_auth(t),
            None => req,
        })
    }

    pub async fn submit(&self, text: &str) -> Result<SubmitResponse, ClientError> {
        let req = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .json(&SubmitRequest {
                text: text.to_string(),
            });
        let res = self.authorized(req).await?.send().await?;
        decode(res).await
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobView, ClientError> {
        let req = self.http.get(format!("{}/jobs/{job_id}", self.base_url));
        let res = self.authorized(req).await?.send().await?;
        decode(res).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(res: reqwest::Response) -> Result<T, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json::<T>().await?);
    }

    let text = res.text().await?;
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
        error: "http_error".to_string(),
        message: text,
    });
    Err(ClientError::Api { status, body })
}
