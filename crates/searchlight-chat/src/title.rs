//! Short chat titles

use searchlight_ai::{Context, LlmProvider, Message, Model, StreamOptions};
use tokio_util::sync::CancellationToken;

const TITLE_PROMPT: &str = "You generate short, descriptive titles for chat conversations.
Rules:
- Use at most 6 words.
- No quotes around the title.
- No prefixes like 'Title:' or 'Chat:'.
- Make it specific, based on the user's question.

User's first message:
{FIRST_MESSAGE}

Return ONLY the title, nothing else.";

const MAX_TITLE_CHARS: usize = 80;
const MAX_TITLE_WORDS: usize = 6;

/// Title used when nothing better is available
pub const DEFAULT_TITLE: &str = "New chat";

/// Ask the model for a title for the conversation that starts with `first_message`.
///
/// Never fails: errors, cancellation and empty answers fall back to the first
/// line of the message.
pub async fn generate_title(
    provider: &dyn LlmProvider,
    model: &Model,
    first_message: &str,
    cancel: &CancellationToken,
) -> String {
    let first_message = first_message.trim();
    if first_message.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    let mut context = Context::default();
    context.push(Message::user(TITLE_PROMPT.replace("{FIRST_MESSAGE}", first_message)));
    let options = StreamOptions::deterministic(32);

    let raw = tokio::select! {
        biased;
        _ = cancel.cancelled() => return fallback_title(first_message),
        result = provider.complete(model, &context, &options) => result,
    };

    match raw {
        Ok(raw) => clean_title(&raw).unwrap_or_else(|| fallback_title(first_message)),
        Err(e) => {
            tracing::debug!("Title generation failed: {}", e);
            fallback_title(first_message)
        }
    }
}

/// Normalize model output into a title; `None` when nothing usable is left
pub fn clean_title(raw: &str) -> Option<String> {
    let mut title = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for prefix in ["title:", "chat:"] {
        if title.to_lowercase().starts_with(prefix) {
            title = title[prefix.len()..].trim().to_string();
        }
    }

    let quotes: &[char] = &['"', '\'', '`', '*', '\u{201c}', '\u{201d}'];
    let title = title.trim_matches(quotes).trim().trim_end_matches('.');

    let words: Vec<&str> = title.split_whitespace().take(MAX_TITLE_WORDS).collect();
    let title = truncate_chars(&words.join(" "), MAX_TITLE_CHARS);
    (!title.is_empty()).then_some(title)
}

/// First line of the first message, or the default title
pub fn fallback_title(first_message: &str) -> String {
    let line = first_message.trim().lines().next().unwrap_or("").trim();
    let line = truncate_chars(line, MAX_TITLE_CHARS);
    if line.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        line
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use searchlight_ai::{MessageEvent, MessageEventStream, StopReason, Usage};

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"Paris Weather Tomorrow\"\n").as_deref(), Some("Paris Weather Tomorrow"));
        assert_eq!(clean_title("Title: Rust async cancellation.").as_deref(), Some("Rust async cancellation"));
        assert_eq!(
            clean_title("one two three four five six seven eight").as_deref(),
            Some("one two three four five six")
        );
        assert_eq!(clean_title(" '' "), None);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("How do I bake bread?\nThanks"), "How do I bake bread?");
        assert_eq!(fallback_title("   "), DEFAULT_TITLE);
        assert_eq!(fallback_title(&"x".repeat(200)).chars().count(), 80);
    }

    struct FixedProvider(Option<&'static str>);

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn stream(
            &self,
            _model: &Model,
            _context: &Context,
            _options: &StreamOptions,
        ) -> searchlight_ai::Result<MessageEventStream> {
            let event = match self.0 {
                Some(text) => MessageEvent::Done {
                    text: text.into(),
                    stop_reason: StopReason::Stop,
                    usage: Usage::default(),
                },
                None => MessageEvent::Error {
                    message: "model not loaded".into(),
                },
            };
            Ok(Box::pin(futures::stream::iter(vec![event])))
        }
    }

    #[tokio::test]
    async fn test_generate_title_uses_model_answer() {
        let title = generate_title(
            &FixedProvider(Some("Paris weather forecast")),
            &Model::ollama("llama3"),
            "What's the weather in Paris tomorrow?",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(title, "Paris weather forecast");
    }

    #[tokio::test]
    async fn test_generate_title_falls_back_on_error() {
        let title = generate_title(
            &FixedProvider(None),
            &Model::ollama("llama3"),
            "What's the weather in Paris tomorrow?",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(title, "What's the weather in Paris tomorrow?");
    }
}
