use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for pipeline work. The classification of an error decides
/// whether the item is retried on a later run, never retried, or whether the
/// whole run aborts.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network-level failure (timeout, refused connection, bad proxy).
    /// Eligible for retry with backoff, and for `--retry-blocked` re-runs.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Provider-signalled throttling. Retried with longer backoff, honoring
    /// the provider-specified wait when one is given.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The content itself cannot be processed (captions disabled, video
    /// deleted, invalid embedding input). Never retried automatically.
    #[error("permanent content error: {0}")]
    PermanentContent(String),

    /// Missing or invalid credentials/settings. Fatal: aborts the run
    /// immediately rather than failing per-item.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Local persistence failure. Retryable on a later run.
    #[error("storage error: {0}")]
    Storage(String),

    /// Aggregate failure rate for a stage run crossed the configured
    /// ceiling. Fatal, surfaced to the caller with a non-zero exit.
    #[error("stage failure rate exceeded ceiling: {failed}/{attempted} items failed")]
    FailureCeiling { failed: usize, attempted: usize },
}

impl PipelineError {
    /// Whether a later run may retry the item that hit this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork(_)
                | PipelineError::RateLimit { .. }
                | PipelineError::Storage(_)
        )
    }

    /// Fatal errors abort the whole run instead of being recorded per-item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_) | PipelineError::FailureCeiling { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP response status from an external collaborator.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return PipelineError::RateLimit {
                message: body,
                retry_after: None,
            };
        }
        // YouTube surfaces quota exhaustion as 403 with a quota reason.
        if status == reqwest::StatusCode::FORBIDDEN && body.contains("quota") {
            return PipelineError::RateLimit {
                message: body,
                retry_after: None,
            };
        }
        if status.is_server_error() {
            return PipelineError::TransientNetwork(format!("{}: {}", status, body));
        }
        PipelineError::PermanentContent(format!("{}: {}", status, body))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::TransientNetwork(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}
