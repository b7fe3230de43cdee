use thiserror::Error;

/// Failure talking to an upstream model service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ServiceError::Status { status: 429, .. })
    }
}

/// Fatal error for a single work item. Expected failure modes never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Generation call failed: {0}")]
    Generation(#[from] ServiceError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
