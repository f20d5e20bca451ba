//! Error types for searchlight-chat

use std::time::Duration;
use thiserror::Error;

/// Result type alias using searchlight-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a chat turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the LLM backend layer
    #[error(transparent)]
    Ai(#[from] searchlight_ai::Error),

    /// An error from the web search layer
    #[error(transparent)]
    Web(#[from] searchlight_web::Error),

    /// The planner did not answer in time
    #[error("Search planner timed out after {0:?}")]
    PlannerTimeout(Duration),

    /// The planner answered with something that is not a valid plan
    #[error("Invalid planner output: {0}")]
    PlannerOutput(String),

    /// The search backend could not be used for this turn
    #[error("Web search unavailable: {0}")]
    SearchBackendUnavailable(String),

    /// Generation failed; the turn ends with an incomplete message
    #[error("Generation failed: {0}")]
    GenerationBackendError(String),

    /// The turn was cancelled by the user or superseded by a new turn
    #[error("Cancelled")]
    Cancelled,

    /// A generic chat error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the turn was cancelled rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Ai(searchlight_ai::Error::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_detection() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Ai(searchlight_ai::Error::Aborted).is_cancelled());
        assert!(!Error::Other("x".into()).is_cancelled());
    }

    #[test]
    fn test_display_is_transparent_for_lower_layers() {
        let err: Error = searchlight_web::Error::Status(502).into();
        assert_eq!(err.to_string(), "Search backend returned HTTP 502");
    }
}
