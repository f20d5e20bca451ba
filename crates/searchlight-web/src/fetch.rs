//! Bounded page fetching

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::time::{Instant, timeout_at};

use crate::error::{Error, FetchFailure, Result};
use crate::extract::{collapse_whitespace, html_to_text};
use crate::types::FetchedPage;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; searchlight/0.1)";
const MAX_REDIRECTS: usize = 5;

/// Hard limits applied to every fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Bytes read from the body before the download is cut off
    pub max_bytes: usize,
    /// One deadline covering connect, headers and body
    pub timeout: Duration,
    /// Characters of extracted text kept per page
    pub max_text_chars: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024,
            timeout: Duration::from_secs(8),
            max_text_chars: 6_000,
        }
    }
}

/// Fetches one page and extracts its text
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        limits: FetchLimits,
    ) -> std::result::Result<FetchedPage, FetchFailure>;
}

/// reqwest-backed fetcher
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client })
    }

    /// Use an existing client (shared connection pool)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        url: &str,
        limits: FetchLimits,
    ) -> std::result::Result<FetchedPage, FetchFailure> {
        let deadline = Instant::now() + limits.timeout;

        let request = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,text/plain;q=0.9",
            )
            .send();
        let response = match timeout_at(deadline, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(FetchFailure::Timeout(limits.timeout)),
            Ok(Err(e)) => return Err(FetchFailure::Request(e.to_string())),
            Err(_) => return Err(FetchFailure::Timeout(limits.timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        let kind = ContentKind::from_header(&content_type)
            .ok_or_else(|| FetchFailure::UnsupportedContent(content_type.clone()))?;

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut chunks = response.bytes_stream();
        loop {
            match timeout_at(deadline, chunks.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let room = limits.max_bytes.saturating_sub(body.len());
                    if chunk.len() >= room {
                        body.extend_from_slice(&chunk[..room]);
                        // Only a cap hit if there was more to read
                        truncated = chunk.len() > room
                            || !matches!(timeout_at(deadline, chunks.next()).await, Ok(None));
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(Some(Err(e))) => {
                    if body.is_empty() {
                        return Err(FetchFailure::Request(e.to_string()));
                    }
                    tracing::debug!(url, "body read failed after {} bytes: {}", body.len(), e);
                    truncated = true;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    if body.is_empty() {
                        return Err(FetchFailure::Timeout(limits.timeout));
                    }
                    tracing::debug!(url, bytes = body.len(), "deadline hit, keeping partial body");
                    truncated = true;
                    break;
                }
            }
        }

        let raw = String::from_utf8_lossy(&body);
        let (title, text, text_truncated) = match kind {
            ContentKind::Html => {
                let extracted = html_to_text(&raw, limits.max_text_chars);
                (extracted.title, extracted.text, extracted.truncated)
            }
            ContentKind::Plain => {
                let (text, cut) = collapse_whitespace(&raw, limits.max_text_chars);
                (None, text, cut)
            }
        };

        if text.trim().is_empty() {
            return Err(FetchFailure::NoContent);
        }

        Ok(FetchedPage {
            url: url.to_string(),
            title,
            extracted_text: text,
            truncated: truncated || text_truncated,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Plain,
}

impl ContentKind {
    fn from_header(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim();
        match mime {
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "text/plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// Fetch every URL with at most `concurrency` requests in flight.
///
/// Results come back in input order, one entry per URL.
pub async fn fetch_all(
    fetcher: &dyn PageFetcher,
    urls: &[String],
    limits: FetchLimits,
    concurrency: usize,
) -> Vec<(String, std::result::Result<FetchedPage, FetchFailure>)> {
    let fetches: Vec<_> = urls
        .iter()
        .cloned()
        .map(|url| async move {
            let result = fetcher.fetch(&url, limits).await;
            if let Err(ref failure) = result {
                tracing::debug!(url = %url, "fetch failed: {}", failure);
            }
            (url, result)
        })
        .collect();
    stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await
}
