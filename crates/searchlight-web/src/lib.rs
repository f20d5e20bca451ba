//! searchlight-web: web search plumbing for search-augmented generation
//!
//! Queries a SearXNG meta-search instance, fetches candidate pages with hard
//! size and time limits, extracts readable text and assembles a bounded,
//! citation-marked context block for the prompt.

pub mod assemble;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod search;
pub mod types;

pub use assemble::assemble;
pub use error::{Error, FetchFailure, Result};
pub use fetch::{FetchLimits, HttpPageFetcher, PageFetcher, fetch_all};
pub use search::{SearchEngine, SearxClient, SearxConfig, interleave_results, normalize_url};
pub use types::*;
