use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::TimecodeError;
use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong between a submission and a ready project.
///
/// Only `Proxy` is absorbed inside the pipeline; every other variant aborts
/// the run and reaches the caller unchanged.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("proxy transcode failed: {0}")]
    Proxy(String),

    #[error("video analysis failed: {0}")]
    Analysis(String),

    #[error("video analysis still pending after {attempts} polls")]
    AnalysisTimeout { attempts: u32 },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index write failed: {0}")]
    IndexWrite(String),

    #[error("clip encode failed: {detail}")]
    ClipEncode { detail: String },

    #[error("project {0} not found")]
    ProjectNotFound(String),

    #[error("clip {0} not found")]
    ClipNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("pipeline did not finish within {0}s")]
    Timeout(u64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::ProjectNotFound(_) | PipelineError::ClipNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::Download(_)
            | PipelineError::Analysis(_)
            | PipelineError::Embedding(_) => StatusCode::BAD_GATEWAY,
            PipelineError::AnalysisTimeout { .. } | PipelineError::Timeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            PipelineError::Proxy(_)
            | PipelineError::IndexWrite(_)
            | PipelineError::ClipEncode { .. }
            | PipelineError::Storage(_)
            | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<TimecodeError> for PipelineError {
    fn from(err: TimecodeError) -> Self {
        PipelineError::InvalidRequest(err.to_string())
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
