// crates/extractflow/src/api/models.rs
use serde::{Deserialize, Serialize};

pub use crate::jobs::JobView;
pub use crate::submission::{SubmitRequest, SubmitResponse};

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
