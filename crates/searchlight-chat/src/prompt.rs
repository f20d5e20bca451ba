//! Prompt construction for the generation call

use searchlight_ai::{Context, Message};
use searchlight_web::{SearchQuery, WebContext};

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Write equations between $ signs, with no space between the $ and the equation.";

const WEB_ONLY_INSTRUCTION: &str = "Answer the next user message based solely on the \
web search results above. Use only information that is clearly supported by those \
results. If the answer is unclear or not present, say that you don't know.";

/// Render the web context as the system message placed before the user message
pub fn web_context_message(
    web: &WebContext,
    queries: &[SearchQuery],
    strict_web_only: bool,
) -> Message {
    let mut text = String::from("Web search results and page content.\n");
    if !queries.is_empty() {
        let list: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        text.push_str(&format!("Search queries used: {}\n", list.join(" | ")));
    }
    text.push_str("Each source begins with [n]. Cite sources as [n] when you rely on them.\n\n");
    text.push_str(&web.assembled_text);
    if strict_web_only {
        text.push_str("\n\n");
        text.push_str(WEB_ONLY_INSTRUCTION);
    }
    Message::system(text)
}

/// Build the generation context: history, optional web context, then the user message
pub fn build_generation_context(
    system_prompt: Option<&str>,
    history: &[Message],
    user_text: &str,
    web: Option<(&WebContext, &[SearchQuery])>,
    strict_web_only: bool,
) -> Context {
    let mut context = match system_prompt {
        Some(prompt) if !prompt.trim().is_empty() => Context::with_system(prompt),
        _ => Context::default(),
    };
    context.messages.extend(history.iter().cloned());
    if let Some((web, queries)) = web {
        if !web.is_empty() {
            context.push(web_context_message(web, queries, strict_web_only));
        }
    }
    context.push(Message::user(user_text));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_ai::Role;
    use searchlight_web::Citation;

    fn web() -> WebContext {
        WebContext {
            assembled_text: "[1] Forecast\nURL: https://meteo.example\nRain".into(),
            citations: vec![Citation {
                title: "Forecast".into(),
                url: "https://meteo.example".into(),
            }],
        }
    }

    #[test]
    fn test_plain_prompt_is_unmodified() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let ctx = build_generation_context(Some("sys"), &history, "How are you?", None, true);
        assert_eq!(ctx.system_prompt.as_deref(), Some("sys"));
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages[2], Message::user("How are you?"));
    }

    #[test]
    fn test_web_context_sits_before_user_message() {
        let queries = vec![SearchQuery::new("weather Paris tomorrow")];
        let web = web();
        let ctx = build_generation_context(None, &[], "Weather?", Some((&web, &queries)), true);
        assert!(ctx.system_prompt.is_none());
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].role, Role::System);
        assert!(ctx.messages[0].content.contains("[1] Forecast"));
        assert!(ctx.messages[0].content.contains("weather Paris tomorrow"));
        assert!(ctx.messages[0].content.contains("solely on the web search results"));
        assert_eq!(ctx.messages[1].role, Role::User);
    }

    #[test]
    fn test_lenient_mode_and_empty_context() {
        let web = web();
        let msg = web_context_message(&web, &[], false);
        assert!(!msg.content.contains("solely"));
        assert!(!msg.content.contains("Search queries used"));

        let empty = WebContext::default();
        let ctx = build_generation_context(None, &[], "q", Some((&empty, &[])), true);
        assert_eq!(ctx.messages.len(), 1);
    }
}
