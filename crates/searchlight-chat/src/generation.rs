//! Streaming generation with cooperative cancellation

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use searchlight_ai::{
    Context, LlmProvider, MessageBuilder, MessageEvent, Model, StreamOptions, Usage,
};
use tokio_util::sync::CancellationToken;

/// Retry configuration for opening the backend stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Lifecycle of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Cancelled | GenerationState::Failed
        )
    }
}

/// How a generation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed { text: String, usage: Usage },
    Cancelled { partial: String },
    Failed { partial: String, error: String },
}

impl GenerationOutcome {
    pub fn state(&self) -> GenerationState {
        match self {
            GenerationOutcome::Completed { .. } => GenerationState::Completed,
            GenerationOutcome::Cancelled { .. } => GenerationState::Cancelled,
            GenerationOutcome::Failed { .. } => GenerationState::Failed,
        }
    }
}

/// One in-flight LLM call. Owns the token that aborts it.
///
/// Cloning is cheap; clones share the token and state.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    id: String,
    cancel: CancellationToken,
    state: Arc<Mutex<GenerationState>>,
}

impl GenerationTask {
    /// Create a task cancelled together with `parent`
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cancel: parent.child_token(),
            state: Arc::new(Mutex::new(GenerationState::Idle)),
        }
    }

    pub fn new() -> Self {
        Self::child_of(&CancellationToken::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Abort the generation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> GenerationState {
        *self.state.lock()
    }

    fn set_state(&self, state: GenerationState) {
        *self.state.lock() = state;
    }
}

impl Default for GenerationTask {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams an answer from the backend
pub struct GenerationWorker {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    options: StreamOptions,
    retry_config: RetryConfig,
}

impl GenerationWorker {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            options: StreamOptions::chat(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Set sampling options
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Stream a response for `context`, calling `on_token` with each delta in
    /// arrival order.
    ///
    /// The token is checked at every delta boundary; once it fires the
    /// response stream is dropped (aborting the request) and `on_token` is not
    /// called again.
    pub async fn generate<F>(
        &self,
        context: &Context,
        mut on_token: F,
        task: &GenerationTask,
    ) -> GenerationOutcome
    where
        F: FnMut(&str) + Send,
    {
        task.set_state(GenerationState::Streaming);
        let outcome = self.run(context, &mut on_token, task.token()).await;
        task.set_state(outcome.state());
        outcome
    }

    async fn run<F>(
        &self,
        context: &Context,
        on_token: &mut F,
        cancel: &CancellationToken,
    ) -> GenerationOutcome
    where
        F: FnMut(&str) + Send,
    {
        let mut attempt = 0u32;
        let mut stream = loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GenerationOutcome::Cancelled { partial: String::new() },
                opened = self.provider.stream(&self.model, context, &self.options) => opened,
            };

            match opened {
                Ok(stream) => break stream,
                Err(e) => {
                    if attempt < self.retry_config.max_retries && e.is_retryable() {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.retry_config.max_retries + 1,
                            e,
                            delay
                        );
                        attempt += 1;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return GenerationOutcome::Cancelled { partial: String::new() },
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    return GenerationOutcome::Failed {
                        partial: String::new(),
                        error: e.to_string(),
                    };
                }
            }
        };

        let mut builder = MessageBuilder::new();
        let mut emitted = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("generation cancelled after {} bytes", builder.text().len());
                    return GenerationOutcome::Cancelled { partial: builder.into_text() };
                }
                event = stream.next() => event,
            };

            let Some(event) = event else {
                return GenerationOutcome::Failed {
                    partial: builder.into_text(),
                    error: "stream ended without a completion marker".to_string(),
                };
            };

            builder.process_event(&event);
            match event {
                MessageEvent::TextDelta { delta } => {
                    if !delta.is_empty() {
                        emitted = true;
                        on_token(&delta);
                    }
                }
                MessageEvent::Done { usage, .. } => {
                    // Some backends only report the text at the end
                    if !emitted && !builder.text().is_empty() {
                        on_token(builder.text());
                    }
                    return GenerationOutcome::Completed {
                        text: builder.into_text(),
                        usage,
                    };
                }
                MessageEvent::Error { message } => {
                    return GenerationOutcome::Failed {
                        partial: builder.into_text(),
                        error: message,
                    };
                }
                MessageEvent::Start { .. } => {}
            }
        }
    }
}
