//! searchlight-ai: Local LLM backend abstraction layer
//!
//! This crate provides a common streaming interface over the chat endpoints of
//! local LLM servers: Ollama's native `/api/chat` and OpenAI-compatible
//! `/chat/completions` servers (llama.cpp, LM Studio, vLLM, ...).

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{LlmProvider, create_provider};
pub use stream::{MessageBuilder, MessageEvent, MessageEventStream};
pub use types::*;
