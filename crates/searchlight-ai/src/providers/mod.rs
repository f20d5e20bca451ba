//! LLM backend implementations

pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    Backend, Context, Error, MessageBuilder, MessageEvent, MessageEventStream, Model, Result,
    StreamOptions,
};

/// Trait for LLM backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// Dropping the returned stream aborts the underlying HTTP request.
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;

    /// Run a request to completion and return the full text
    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<String> {
        let mut stream = self.stream(model, context, options).await?;
        let mut builder = MessageBuilder::new();
        while let Some(event) = stream.next().await {
            builder.process_event(&event);
            match event {
                MessageEvent::Done { .. } => return Ok(builder.into_text()),
                MessageEvent::Error { message } => return Err(Error::api("stream_error", message)),
                _ => {}
            }
        }
        Err(Error::UnexpectedResponse(
            "stream ended without a completion marker".to_string(),
        ))
    }
}

/// Create the provider matching a model's backend
pub fn create_provider(model: &Model, api_key: Option<&str>) -> Arc<dyn LlmProvider> {
    match model.backend {
        Backend::Ollama => Arc::new(ollama::OllamaProvider::new()),
        Backend::OpenAICompatible => {
            Arc::new(openai::OpenAICompatibleProvider::new(api_key.map(str::to_string)))
        }
    }
}
