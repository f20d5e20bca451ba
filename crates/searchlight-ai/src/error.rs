//! Error types for searchlight-ai

use thiserror::Error;

/// Result type alias using searchlight-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an LLM backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend reported an error inside an otherwise successful response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Request did not finish in time
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Model not found on the backend
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying before any output was produced
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Sse(_) | Error::Timeout(_) => true,
            Error::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("overloaded")
                    || msg.contains("overloaded")
                    || msg.contains("server busy")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Check if the backend does not know the requested model
    pub fn is_model_not_found(&self) -> bool {
        match self {
            Error::ModelNotFound(_) => true,
            Error::Status { status, body } => {
                *status == 404 && body.to_lowercase().contains("model")
            }
            Error::Api { message, .. } => {
                let msg = message.to_lowercase();
                msg.contains("model") && msg.contains("not found")
            }
            _ => false,
        }
    }
}
