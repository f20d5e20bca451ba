//! Core types for LLM interactions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire protocol spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Ollama native `/api/chat` (newline-delimited JSON stream)
    Ollama,
    /// OpenAI-compatible `/chat/completions` (server-sent events)
    OpenAICompatible,
}

impl Backend {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Ollama => "Ollama",
            Backend::OpenAICompatible => "OpenAI-compatible",
        }
    }

    /// Base URL a local install of this backend usually listens on
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Backend::Ollama => "http://127.0.0.1:11434",
            Backend::OpenAICompatible => "http://127.0.0.1:8080/v1",
        }
    }

    /// Parse a backend name as used in config files and CLI flags
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(Backend::Ollama),
            "openai" | "openai-compatible" | "llamacpp" | "llama.cpp" | "lmstudio" => {
                Some(Backend::OpenAICompatible)
            }
            _ => None,
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier as the backend knows it (e.g., "llama3:8b")
    pub id: String,
    /// Backend protocol
    pub backend: Backend,
    /// Base URL for API calls
    pub base_url: String,
    /// Context window size in tokens, if known
    #[serde(default)]
    pub context_window: Option<u32>,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// A model served by a local Ollama instance
    pub fn ollama(id: impl Into<String>) -> Self {
        Self::new(id, Backend::Ollama, Backend::Ollama.default_base_url())
    }

    /// A model served by an OpenAI-compatible server
    pub fn openai_compatible(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::new(id, Backend::OpenAICompatible, base_url)
    }

    /// Create a model with explicit backend and base URL
    pub fn new(id: impl Into<String>, backend: Backend, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            id: id.into(),
            backend,
            base_url: base_url.trim_end_matches('/').to_string(),
            context_window: None,
            headers: HashMap::new(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

impl Usage {
    /// Add another usage record to this one
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Error occurred
    Error,
    /// Request was aborted
    Aborted,
}

impl StopReason {
    /// Map a backend-provided finish/done reason
    pub fn from_backend(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => StopReason::Length,
            _ => StopReason::Stop,
        }
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Context for an LLM request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
}

impl Context {
    /// Create a new context with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![],
        }
    }

    /// Add a message to the context
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in wire order, with the system prompt first
    pub fn wire_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref system_prompt) = self.system_prompt {
            if !system_prompt.trim().is_empty() {
                out.push(Message::system(system_prompt.clone()));
            }
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

/// Sampling options for a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Nucleus sampling
    pub top_p: Option<f32>,
    /// Repetition penalty (Ollama only)
    pub repeat_penalty: Option<f32>,
    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl StreamOptions {
    /// Defaults used for normal chat replies
    pub fn chat() -> Self {
        Self {
            max_tokens: Some(2048),
            temperature: Some(0.7),
            top_p: Some(0.9),
            repeat_penalty: Some(1.1),
            stop_sequences: vec![],
        }
    }

    /// Short, deterministic completions (planning, titles)
    pub fn deterministic(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            temperature: Some(0.0),
            top_p: None,
            repeat_penalty: None,
            stop_sequences: vec![],
        }
    }
}
