//! Meta-search backend client (SearXNG JSON API)

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{SearchQuery, SearchResult};

/// Trait for meta-search backends
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Run one query, surfacing backend failures
    async fn try_search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<SearchResult>>;

    /// Run one query; an unavailable backend yields no results instead of an error
    async fn search(&self, query: &SearchQuery, limit: usize) -> Vec<SearchResult> {
        match self.try_search(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(query = %query.text, "search backend unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

/// SearXNG connection settings
#[derive(Debug, Clone)]
pub struct SearxConfig {
    /// Instance root, e.g. `http://127.0.0.1:8888`
    pub base_url: String,
    pub timeout: Duration,
    /// `"auto"` leaves the language to the instance default
    pub language: String,
    /// 0 = off, 1 = moderate, 2 = strict
    pub safesearch: u8,
    pub categories: Option<String>,
}

impl Default for SearxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8888".to_string(),
            timeout: Duration::from_secs(15),
            language: "en".to_string(),
            safesearch: 1,
            categories: None,
        }
    }
}

/// SearXNG client
pub struct SearxClient {
    client: reqwest::Client,
    config: SearxConfig,
}

impl SearxClient {
    pub fn new(config: SearxConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::InvalidConfig("empty SearXNG base URL".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("searchlight/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn query_params(&self, query: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", query.to_string()), ("format", "json".to_string())];
        let language = self.config.language.trim();
        if !language.is_empty() && language != "auto" {
            params.push(("language", language.to_string()));
        }
        params.push(("safesearch", self.config.safesearch.min(2).to_string()));
        if let Some(ref categories) = self.config.categories {
            if !categories.trim().is_empty() {
                params.push(("categories", categories.clone()));
            }
        }
        params
    }
}

#[async_trait]
impl SearchEngine for SearxClient {
    async fn try_search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<SearchResult>> {
        let text = query.text.trim();
        if text.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&self.query_params(text))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let parsed: SearxResponse = serde_json::from_str(&body)?;
        let results = convert_results(parsed.results, limit);
        tracing::debug!(query = %text, count = results.len(), "search complete");
        Ok(results)
    }
}

fn convert_results(raw: Vec<SearxItem>, limit: usize) -> Vec<SearchResult> {
    raw.into_iter()
        .filter_map(|item| {
            let url = item.url.unwrap_or_default().trim().to_string();
            if url.is_empty() {
                return None;
            }
            let title = item.title.unwrap_or_default().trim().to_string();
            let snippet = item
                .content
                .filter(|c| !c.trim().is_empty())
                .or(item.snippet)
                .unwrap_or_default()
                .trim()
                .to_string();
            Some((title, url, snippet))
        })
        .take(limit)
        .enumerate()
        .map(|(i, (title, url, snippet))| SearchResult {
            title: if title.is_empty() { url.clone() } else { title },
            url,
            snippet,
            rank: i + 1,
        })
        .collect()
}

/// Key used to recognise the same page reached through cosmetic URL variants
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), url),
    };
    let (host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let path = path.trim_end_matches('/');
    let scheme = if scheme == "http" { "https".to_string() } else { scheme };
    format!("{}://{}{}", scheme, host.to_ascii_lowercase(), path)
}

/// Merge per-query result lists round-robin by query order, keeping each
/// list's own ranking, dropping duplicate URLs and re-ranking from 1.
pub fn interleave_results(per_query: Vec<Vec<SearchResult>>, limit: usize) -> Vec<SearchResult> {
    let mut lists: Vec<std::vec::IntoIter<SearchResult>> = per_query
        .into_iter()
        .map(|mut list| {
            list.sort_by_key(|r| r.rank);
            list.into_iter()
        })
        .collect();

    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    'outer: loop {
        let mut progressed = false;
        for list in lists.iter_mut() {
            if let Some(result) = list.next() {
                progressed = true;
                if seen.insert(normalize_url(&result.url)) {
                    merged.push(result);
                    if merged.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }
        if !progressed {
            break;
        }
    }

    for (i, result) in merged.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    merged
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxItem>,
}

#[derive(Debug, Deserialize)]
struct SearxItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result(url: &str, rank: usize) -> SearchResult {
        SearchResult {
            title: format!("title {}", url),
            url: url.to_string(),
            snippet: String::new(),
            rank,
        }
    }

    fn client_for(server: &MockServer) -> SearxClient {
        SearxClient::new(SearxConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            ..SearxConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_url_variants() {
        assert_eq!(
            normalize_url("HTTP://Example.com/a/b/#frag"),
            normalize_url("https://example.com/a/b")
        );
        assert_ne!(
            normalize_url("https://example.com/A"),
            normalize_url("https://example.com/a")
        );
    }

    #[test]
    fn test_interleave_round_robin_by_query_order() {
        let q1 = vec![result("https://a.com/1", 1), result("https://a.com/2", 2)];
        let q2 = vec![
            result("https://b.com/1", 1),
            result("https://b.com/2", 2),
            result("https://b.com/3", 3),
        ];
        let merged = interleave_results(vec![q1, q2], 10);
        let urls: Vec<&str> = merged.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.com/1",
                "https://b.com/1",
                "https://a.com/2",
                "https://b.com/2",
                "https://b.com/3"
            ]
        );
        let ranks: Vec<usize> = merged.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_interleave_dedups_and_limits() {
        let q1 = vec![result("https://a.com/x", 1), result("https://a.com/y", 2)];
        let q2 = vec![result("https://a.com/x/", 1), result("https://c.com", 2)];
        let merged = interleave_results(vec![q1, q2], 2);
        let urls: Vec<&str> = merged.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com/x", "https://a.com/y"]);
    }

    #[test]
    fn test_interleave_respects_rank_within_query() {
        let q1 = vec![result("https://a.com/2", 2), result("https://a.com/1", 1)];
        let merged = interleave_results(vec![q1], 5);
        assert_eq!(merged[0].url, "https://a.com/1");
    }

    #[test]
    fn test_convert_results_skips_missing_urls_and_falls_back_to_url_title() {
        let raw = vec![
            SearxItem {
                title: Some("No url".into()),
                url: None,
                content: None,
                snippet: None,
            },
            SearxItem {
                title: Some("  ".into()),
                url: Some("https://example.org".into()),
                content: Some("".into()),
                snippet: Some("from snippet".into()),
            },
        ];
        let results = convert_results(raw, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "https://example.org");
        assert_eq!(results[0].snippet, "from snippet");
        assert_eq!(results[0].rank, 1);
    }

    #[tokio::test]
    async fn test_search_preserves_order_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "weather Paris tomorrow"))
            .and(query_param("format", "json"))
            .and(query_param("language", "en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": "Météo Paris", "url": "https://meteo.fr/paris", "content": "Rain"},
                    {"title": "BBC Weather", "url": "https://bbc.co.uk/weather/paris", "content": "Cloudy"},
                    {"title": "AccuWeather", "url": "https://accuweather.com/paris", "content": "Sun"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let results = client
            .try_search(&SearchQuery::new("weather Paris tomorrow"), 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://meteo.fr/paris");
        assert_eq!(results[1].snippet, "Cloudy");
        assert_eq!(results[1].rank, 2);
    }

    #[tokio::test]
    async fn test_search_swallows_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let query = SearchQuery::new("anything");
        assert!(matches!(
            client.try_search(&query, 5).await,
            Err(Error::Status(503))
        ));
        assert!(client.search(&query, 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_unreachable_backend_is_empty() {
        let client = SearxClient::new(SearxConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
            ..SearxConfig::default()
        })
        .unwrap();
        assert!(client.search(&SearchQuery::new("rust"), 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.try_search(&SearchQuery::new("   "), 5).await.unwrap().is_empty());
    }

    #[test]
    fn test_auto_language_is_omitted() {
        let client = SearxClient::new(SearxConfig {
            language: "auto".into(),
            categories: Some("news".into()),
            ..SearxConfig::default()
        })
        .unwrap();
        let params = client.query_params("q");
        assert!(params.iter().all(|(k, _)| *k != "language"));
        assert!(params.iter().any(|(k, v)| *k == "categories" && v == "news"));
    }
}
