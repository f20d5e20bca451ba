//! Error types for searchlight-web

use std::time::Duration;
use thiserror::Error;

/// Result type alias using searchlight-web Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the meta-search backend
#[derive(Error, Debug)]
pub enum Error {
    /// Backend unreachable or request failed
    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Search backend returned HTTP {0}")]
    Status(u16),

    /// Response body was not the expected JSON
    #[error("Malformed search response: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid search configuration: {0}")]
    InvalidConfig(String),
}

/// Why a single page could not be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// No byte arrived before the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status
    #[error("HTTP {0}")]
    Status(u16),

    /// Content type we cannot extract text from
    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),

    /// Page parsed but held no readable text
    #[error("page contained no extractable text")]
    NoContent,

    /// Connection or transport error
    #[error("request error: {0}")]
    Request(String),
}
