//! Per-turn web data

use serde::{Deserialize, Serialize};

/// A query chosen for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    /// Why the planner picked this query
    pub rationale: Option<String>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// A ranked result candidate. `rank` is 1-based, lower is better.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub rank: usize,
}

/// Readable text pulled from one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    /// Contents of `<title>`, when present
    pub title: Option<String>,
    pub extracted_text: String,
    /// Set when the byte cap, the deadline or the text cap cut the page short
    pub truncated: bool,
}

/// Source attribution attached to a finalized message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// Bounded context block injected into one prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebContext {
    pub assembled_text: String,
    pub citations: Vec<Citation>,
}

impl WebContext {
    pub fn is_empty(&self) -> bool {
        self.assembled_text.is_empty()
    }
}
