use thiserror::Error;

use crate::events::Severity;

/// Errors returned by DALL-E generation operations.
#[derive(Error, Debug)]
pub enum DalleError {
    /// Transport-level failure talking to the provider or the image host.
    #[error("{context}: {source}")]
    Connection {
        context: String,
        source: reqwest::Error,
    },

    /// The provider answered HTTP 429.
    #[error("{}", rate_limit_message(.reason, .message, .retry_after))]
    RateLimited {
        reason: String,
        message: String,
        retry_after: Option<u64>,
    },

    /// Any other non-200 answer from the provider.
    #[error("Failed request: {status} {reason}: {message}")]
    Provider {
        status: u16,
        reason: String,
        message: String,
    },

    /// The image host answered the download with a non-success status.
    #[error("Failed to get image: {status} {reason}")]
    ImageUnavailable { status: u16, reason: String },

    /// HTTP 200 but the body lacks the fields we need.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The image was downloaded but could not be decoded.
    #[error("Malformed image: {0}")]
    MalformedImage(String),

    /// The save directory leaves no room for a file name.
    #[error("The file path is too long ({dir_len} characters of {max}), please choose another save directory")]
    PathTooLong { dir_len: usize, max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// PNG encoding failed while saving an artifact.
    #[error("Failed to encode image: {0}")]
    Encoding(String),

    /// The session was shut down while the unit was in flight.
    #[error("Generation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

fn rate_limit_message(reason: &str, message: &str, retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!("429 error, please retry after {} seconds", secs),
        None => format!("Failed request: 429 {}: {}", reason, message),
    }
}

impl DalleError {
    /// Whether resubmitting the same request later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DalleError::RateLimited { .. } => true,
            DalleError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Wait hint extracted from a 429 message, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DalleError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// How loudly the presentation layer should surface this error.
    pub fn severity(&self) -> Severity {
        match self {
            DalleError::RateLimited { .. } | DalleError::Provider { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl From<anyhow::Error> for DalleError {
    fn from(err: anyhow::Error) -> Self {
        DalleError::Other(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DalleError>;
