use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::error;
use uuid::Uuid;

use crate::api::models::{ErrorBody, JobView, SubmitRequest, SubmitResponse};
use crate::auth::{identify, AuthError, AuthVerifier, Identity};
use crate::submission::{SubmissionService, SubmitError};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub submissions: SubmissionService,
    pub auth: Arc<dyn AuthVerifier>,
}

impl ApiState {
    fn identity(&self, headers: &HeaderMap) -> Result<Option<Identity>, ApiError> {
        identify(self.auth.as_ref(), headers).map_err(ApiError::Auth)
    }
}

pub fn router(state: ApiState) -> Router {
    let limit = body_limit(state.submissions.max_payload_bytes());
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Worst-case JSON size of a text of `max_text` bytes: every byte escaped
/// as `\u00XX`, plus room for the envelope.
fn body_limit(max_text: usize) -> usize {
    max_text.saturating_mul(6).saturating_add(4 * 1024)
}

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(String),
    Body(JsonRejection),
    Submit(SubmitError),
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        ApiError::Submit(e)
    }
}

fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
            ApiError::BadRequest(msg) => {
                json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
            }
            ApiError::Body(rejection) => match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => json_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    rejection.body_text(),
                ),
                _ => json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    rejection.body_text(),
                ),
            },
            ApiError::Submit(e) => match e {
                SubmitError::Validation(msg) => {
                    json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
                }
                e @ SubmitError::PayloadTooLarge { .. } => {
                    json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", e.to_string())
                }
                e @ SubmitError::NotFound(_) => {
                    json_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
                }
                e @ SubmitError::Transport { .. } => json_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "queue_unavailable",
                    e.to_string(),
                ),
                SubmitError::Store(e) => {
                    error!(error = %e, "job store error");
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "store_error",
                        "internal error",
                    )
                }
            },
        }
    }
}

pub async fn submit_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let identity = state.identity(&headers)?;
    let Json(req) = body.map_err(ApiError::Body)?;

    let resp = state.submissions.submit(req, identity.as_ref()).await?;
    Ok(Json(resp))
}

pub async fn get_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let identity = state.identity(&headers)?;
    let job_id: Uuid = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{id:?} is not a job id")))?;

    let job = state
        .submissions
        .get_status(job_id, identity.as_ref())
        .await?;
    Ok(Json(JobView::from(job)))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
