//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use searchlight_ai::{Backend, Model, StreamOptions};
use searchlight_chat::{ChatConfig, PlannerFallback, SearchFailurePolicy, WebSearchConfig};
use searchlight_web::SearxConfig;
use serde::{Deserialize, Serialize};

/// Configuration for searchlight
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to use; picked from the installed Ollama models when unset
    pub model: Option<String>,
    /// Backend protocol (ollama, openai)
    pub backend: Option<String>,
    /// LLM server URL
    pub base_url: Option<String>,
    /// API key for OpenAI-compatible servers that require one
    pub api_key: Option<String>,
    /// Replaces the default system prompt
    pub system_prompt: Option<String>,
    /// Title sessions after the first answer
    pub auto_title: Option<bool>,
    pub generation: GenerationSettings,
    pub web: WebSettings,
}

/// Sampling settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub repeat_penalty: Option<f32>,
}

/// Web search settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub enabled: Option<bool>,
    /// SearXNG instance URL
    pub searx_url: Option<String>,
    pub language: Option<String>,
    pub safesearch: Option<u8>,
    pub categories: Option<String>,
    pub max_search_results: Option<usize>,
    pub max_pages_fetched: Option<usize>,
    /// Cap on the web context size, in bytes
    pub context_token_budget: Option<usize>,
    pub per_request_timeout_ms: Option<u64>,
    pub use_planner: Option<bool>,
    pub planner_timeout_ms: Option<u64>,
    /// "no_search" or "raw_query"
    pub planner_fallback: Option<String>,
    /// "continue" or "abort"
    pub on_search_failure: Option<String>,
    pub max_queries: Option<usize>,
    pub concurrency: Option<usize>,
    pub max_chars_per_page: Option<usize>,
    pub show_query: Option<bool>,
    pub strict_web_only: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("searchlight")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SEARCHLIGHT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Backend protocol, defaulting to Ollama
    pub fn backend(&self) -> Backend {
        self.backend
            .as_deref()
            .and_then(Backend::parse)
            .unwrap_or(Backend::Ollama)
    }

    /// LLM server URL for the configured backend
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.backend().default_base_url().to_string())
    }

    /// Build the model description for `model_id`
    pub fn model(&self, model_id: &str) -> Model {
        Model::new(model_id, self.backend(), self.base_url())
    }

    /// API key from the file, then `SEARCHLIGHT_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("SEARCHLIGHT_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// SearXNG client settings
    pub fn searx(&self) -> SearxConfig {
        let defaults = SearxConfig::default();
        let web = &self.web;
        SearxConfig {
            base_url: web.searx_url.clone().unwrap_or(defaults.base_url),
            // Same default as page fetches, not the client's own
            timeout: web
                .per_request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| WebSearchConfig::default().per_request_timeout()),
            language: web.language.clone().unwrap_or(defaults.language),
            safesearch: web.safesearch.unwrap_or(defaults.safesearch),
            categories: web.categories.clone().or(defaults.categories),
        }
    }

    /// Resolve file values over the built-in defaults
    pub fn resolve(&self) -> ChatConfig {
        let defaults = ChatConfig::default();
        let d = WebSearchConfig::default();
        let w = &self.web;
        let g = &self.generation;
        let chat_defaults = StreamOptions::chat();

        let web = WebSearchConfig {
            enable_web_search: w.enabled.unwrap_or(d.enable_web_search),
            max_search_results: w.max_search_results.unwrap_or(d.max_search_results),
            max_pages_fetched: w.max_pages_fetched.unwrap_or(d.max_pages_fetched),
            context_token_budget: w.context_token_budget.unwrap_or(d.context_token_budget),
            per_request_timeout_ms: w.per_request_timeout_ms.unwrap_or(d.per_request_timeout_ms),
            use_planner: w.use_planner.unwrap_or(d.use_planner),
            planner_timeout_ms: w.planner_timeout_ms.unwrap_or(d.planner_timeout_ms),
            planner_fallback: w
                .planner_fallback
                .as_deref()
                .map(parse_planner_fallback)
                .unwrap_or(d.planner_fallback),
            search_failure_policy: w
                .on_search_failure
                .as_deref()
                .map(parse_failure_policy)
                .unwrap_or(d.search_failure_policy),
            max_queries: w.max_queries.unwrap_or(d.max_queries).max(1),
            concurrency: w.concurrency.unwrap_or(d.concurrency).max(1),
            max_page_bytes: d.max_page_bytes,
            max_chars_per_page: w.max_chars_per_page.unwrap_or(d.max_chars_per_page),
            show_query: w.show_query.unwrap_or(d.show_query),
            strict_web_only: w.strict_web_only.unwrap_or(d.strict_web_only),
        };

        ChatConfig {
            system_prompt: self.system_prompt.clone().or(defaults.system_prompt),
            options: StreamOptions {
                max_tokens: g.max_tokens.or(chat_defaults.max_tokens),
                temperature: g.temperature.or(chat_defaults.temperature),
                top_p: g.top_p.or(chat_defaults.top_p),
                repeat_penalty: g.repeat_penalty.or(chat_defaults.repeat_penalty),
                stop_sequences: chat_defaults.stop_sequences,
            },
            web,
            auto_title: self.auto_title.unwrap_or(defaults.auto_title),
            retry: defaults.retry,
            transcript_chars: defaults.transcript_chars,
            title_timeout_ms: defaults.title_timeout_ms,
        }
    }
}

fn parse_planner_fallback(s: &str) -> PlannerFallback {
    match s.trim().to_lowercase().replace('-', "_").as_str() {
        "raw_query" | "raw" => PlannerFallback::RawQuery,
        _ => PlannerFallback::NoSearch,
    }
}

fn parse_failure_policy(s: &str) -> SearchFailurePolicy {
    match s.trim().to_lowercase().as_str() {
        "abort" | "fail" => SearchFailurePolicy::Abort,
        _ => SearchFailurePolicy::Continue,
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# searchlight configuration file
# Place at ~/.config/searchlight/config.toml (Linux), or point
# SEARCHLIGHT_CONFIG_PATH at another file.

# Model to use (defaults to the first model installed in Ollama)
# model = "llama3.1:8b"

# Backend protocol: ollama or openai (any OpenAI-compatible server)
backend = "ollama"
# base_url = "http://127.0.0.1:11434"
# api_key = "..."          # or SEARCHLIGHT_API_KEY

# Replace the default system prompt
# system_prompt = "You are a helpful assistant."

# Title sessions after the first answer
auto_title = true

[generation]
temperature = 0.7
top_p = 0.9
max_tokens = 2048

[web]
enabled = true
searx_url = "http://127.0.0.1:8888"
language = "en"
safesearch = 1
max_search_results = 10
max_pages_fetched = 5
# Cap on the web context placed in the prompt, in bytes
context_token_budget = 12000
per_request_timeout_ms = 10000
# Let the model decide whether a message needs a search
use_planner = true
planner_timeout_ms = 20000
# When the planner fails: no_search or raw_query
planner_fallback = "no_search"
# When every search fails: continue (answer without web results) or abort
on_search_failure = "continue"
max_queries = 3
concurrency = 4
max_chars_per_page = 6000
show_query = true
# Tell the model to answer only from the web results
strict_web_only = true
"#
}
