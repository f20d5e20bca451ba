//! Ollama native chat API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    stream::{MessageEvent, MessageEventStream},
    types::{Context, Model, StopReason, StreamOptions, Usage},
};

/// Ollama API client
#[derive(Clone, Default)]
pub struct OllamaProvider {
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new provider with a default HTTP client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider that reuses an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// List the models installed on the Ollama instance at `base_url`
    pub async fn list_models(&self, base_url: &str) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        let tags: OllamaTags = response.json().await?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| m.name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> OllamaRequest {
        let messages = context
            .wire_messages()
            .into_iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect();

        OllamaRequest {
            model: model.id.clone(),
            messages,
            stream: true,
            think: false,
            options: OllamaOptions {
                num_predict: options.max_tokens,
                temperature: options.temperature,
                top_p: options.top_p,
                repeat_penalty: options.repeat_penalty,
                stop: if options.stop_sequences.is_empty() {
                    None
                } else {
                    Some(options.stop_sequences.clone())
                },
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = Self::build_request(model, context, options);
        let url = format!("{}/api/chat", model.base_url);

        let mut builder = self.client.post(&url).json(&request);
        for (key, value) in &model.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if status == 404 {
                return Err(Error::ModelNotFound(format!("{}: {}", model.id, body)));
            }
            return Err(Error::Status { status, body });
        }

        tracing::debug!(model = %model.id, "ollama stream opened");
        Ok(Box::pin(create_stream(response, model.id.clone())))
    }
}

fn create_stream(
    response: reqwest::Response,
    model_id: String,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        yield MessageEvent::Start { model: model_id };

        let mut bytes = response.bytes_stream();
        let mut decoder = NdjsonDecoder::default();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in decoder.push(&chunk) {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield MessageEvent::Error {
                        message: format!("stream error: {}", e),
                    };
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield event;
        }
    }
}

/// Incremental decoder for Ollama's newline-delimited JSON stream
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
    text: String,
    finished: bool,
}

impl NdjsonDecoder {
    /// Feed raw bytes, returning the events completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<MessageEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut events);
            if self.finished {
                break;
            }
        }
        events
    }

    /// Flush the trailing line; reports an error if no completion marker was seen
    pub(crate) fn finish(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        if !self.finished {
            let rest = std::mem::take(&mut self.buffer);
            self.decode_line(&rest, &mut events);
        }
        if !self.finished {
            self.finished = true;
            events.push(MessageEvent::Error {
                message: "stream ended before the completion marker".to_string(),
            });
        }
        events
    }

    fn decode_line(&mut self, line: &[u8], events: &mut Vec<MessageEvent>) {
        if self.finished {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let chunk: OllamaChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                events.push(MessageEvent::Error {
                    message: format!("Failed to parse chunk: {}", e),
                });
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            events.push(MessageEvent::Error { message: error });
            return;
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.text.push_str(&message.content);
                events.push(MessageEvent::TextDelta {
                    delta: message.content,
                });
            }
        }

        if chunk.done {
            self.finished = true;
            events.push(MessageEvent::Done {
                text: std::mem::take(&mut self.text),
                stop_reason: StopReason::from_backend(chunk.done_reason.as_deref()),
                usage: Usage {
                    input: chunk.prompt_eval_count.unwrap_or(0),
                    output: chunk.eval_count.unwrap_or(0),
                },
            });
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    think: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    #[serde(default)]
    name: String,
}
