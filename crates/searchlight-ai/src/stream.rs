//! Streaming event types and utilities

use crate::types::{StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during message streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// The backend accepted the request
    Start { model: String },
    /// Text content delta
    TextDelta { delta: String },
    /// Message completed successfully
    Done {
        text: String,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Accumulates streamed deltas into the final text
#[derive(Debug, Default)]
pub struct MessageBuilder {
    text: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextDelta { delta } => self.text.push_str(delta),
            MessageEvent::Done {
                text,
                stop_reason,
                usage,
            } => {
                // Backends that only report the full text at the end
                if self.text.is_empty() {
                    self.text = text.clone();
                }
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            MessageEvent::Error { message } => {
                self.stop_reason = Some(StopReason::Error);
                self.error = Some(message.clone());
            }
            MessageEvent::Start { .. } => {}
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Usage reported by the backend
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Stop reason, once a terminal event was seen
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Error message, if the stream failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Consume the builder and return the text
    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_deltas_in_order() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::Start {
            model: "llama3".into(),
        });
        for delta in ["The ", "sky ", "is blue."] {
            builder.process_event(&MessageEvent::TextDelta {
                delta: delta.into(),
            });
        }
        builder.process_event(&MessageEvent::Done {
            text: "The sky is blue.".into(),
            stop_reason: StopReason::Stop,
            usage: Usage {
                input: 12,
                output: 5,
            },
        });

        assert_eq!(builder.text(), "The sky is blue.");
        assert_eq!(builder.stop_reason(), Some(StopReason::Stop));
        assert_eq!(builder.usage().output, 5);
        assert!(builder.error().is_none());
    }

    #[test]
    fn test_builder_uses_done_text_when_no_deltas() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::Done {
            text: "whole answer".into(),
            stop_reason: StopReason::Length,
            usage: Usage::default(),
        });
        assert_eq!(builder.into_text(), "whole answer");
    }

    #[test]
    fn test_builder_keeps_partial_text_on_error() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta { delta: "Hel".into() });
        builder.process_event(&MessageEvent::Error {
            message: "connection reset".into(),
        });
        assert_eq!(builder.text(), "Hel");
        assert_eq!(builder.stop_reason(), Some(StopReason::Error));
        assert_eq!(builder.error(), Some("connection reset"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(MessageEvent::Error { message: "x".into() }.is_terminal());
        assert!(!MessageEvent::TextDelta { delta: "x".into() }.is_terminal());
    }
}
