//! Chat session state: finalized history plus the one message still streaming

use serde::{Deserialize, Serialize};
use searchlight_ai::{Message, Role};
use searchlight_web::Citation;

/// Whether a finalized message holds a full answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Complete,
    /// Generation failed part way; `content` holds what arrived
    Incomplete { error: String },
}

impl MessageStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, MessageStatus::Complete)
    }
}

/// A message in the session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix millis
    pub timestamp: i64,
    /// Pages the answer drew on, in citation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Citation>,
    #[serde(default, skip_serializing_if = "MessageStatus::is_complete")]
    pub status: MessageStatus,
    /// Degraded-turn annotation, e.g. web search was unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            sources: Vec::new(),
            status: MessageStatus::Complete,
            notice: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_sources(mut self, sources: Vec<Citation>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_notice(mut self, notice: Option<String>) -> Self {
        self.notice = notice;
        self
    }

    pub fn incomplete(mut self, error: impl Into<String>) -> Self {
        self.status = MessageStatus::Incomplete {
            error: error.into(),
        };
        self
    }

    /// Wire form sent to the backend
    pub fn to_llm(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// One conversation.
///
/// `messages` only ever grows. The answer being streamed lives in
/// `streaming` and the user message that started it in `pending_user`;
/// both move into `messages` together when the turn is finalized.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: String,
    pub title: Option<String>,
    pub model: String,
    /// Unix millis
    pub created_at: i64,
    messages: Vec<ChatMessage>,
    pending_user: Option<ChatMessage>,
    streaming: Option<ChatMessage>,
}

impl ChatSession {
    /// Start an empty session
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            model: model.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            messages: Vec::new(),
            pending_user: None,
            streaming: None,
        }
    }

    /// Rebuild a session from persisted history
    pub fn restore(
        id: impl Into<String>,
        title: Option<String>,
        model: impl Into<String>,
        created_at: i64,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            id: id.into(),
            title,
            model: model.into(),
            created_at,
            messages,
            pending_user: None,
            streaming: None,
        }
    }

    /// Finalized messages
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The answer currently being streamed, if any
    pub fn streaming(&self) -> Option<&ChatMessage> {
        self.streaming.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// History as the UI should show it, including the in-flight turn
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        let mut out = self.messages.clone();
        out.extend(self.pending_user.iter().cloned());
        out.extend(self.streaming.iter().cloned());
        out
    }

    /// Finalized history in wire form, skipping empty entries
    pub fn llm_history(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(ChatMessage::to_llm)
            .collect()
    }

    /// First non-empty user message
    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .find(|c| !c.is_empty())
    }

    /// Open the streaming slot for a new turn
    pub(crate) fn begin_turn(&mut self, user: ChatMessage) {
        self.pending_user = Some(user);
        self.streaming = Some(ChatMessage::assistant(String::new()));
    }

    /// Append streamed text to the in-flight answer
    pub(crate) fn push_delta(&mut self, delta: &str) {
        if let Some(ref mut message) = self.streaming {
            message.content.push_str(delta);
        }
    }

    /// Commit the in-flight turn. Returns the committed user and assistant messages.
    pub(crate) fn finalize_turn(
        &mut self,
        content: String,
        sources: Vec<searchlight_web::Citation>,
        status: MessageStatus,
        notice: Option<String>,
    ) -> Vec<ChatMessage> {
        let mut committed = Vec::with_capacity(2);
        if let Some(user) = self.pending_user.take() {
            committed.push(user);
        }
        let mut assistant = self
            .streaming
            .take()
            .unwrap_or_else(|| ChatMessage::assistant(String::new()));
        assistant.content = content;
        assistant.sources = sources;
        assistant.status = status;
        assistant.notice = notice;
        assistant.timestamp = chrono::Utc::now().timestamp_millis();
        committed.push(assistant);

        self.messages.extend(committed.iter().cloned());
        committed
    }

    /// Drop the in-flight turn without committing anything
    pub(crate) fn discard_turn(&mut self) {
        self.pending_user = None;
        self.streaming = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_slot_is_separate_from_history() {
        let mut session = ChatSession::new("llama3");
        session.begin_turn(ChatMessage::user("hi"));
        session.push_delta("Hel");
        session.push_delta("lo");

        assert!(session.messages().is_empty());
        assert_eq!(session.streaming().unwrap().content, "Hello");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "hi");
    }

    #[test]
    fn test_finalize_commits_user_and_answer() {
        let mut session = ChatSession::new("llama3");
        session.begin_turn(ChatMessage::user("weather?"));
        session.push_delta("Rain");
        let sources = vec![Citation {
            title: "Forecast".into(),
            url: "https://meteo.example".into(),
        }];
        let committed =
            session.finalize_turn("Rain".into(), sources.clone(), MessageStatus::Complete, None);

        assert_eq!(committed.len(), 2);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].sources, sources);
        assert!(!session.is_streaming());
        assert_eq!(session.first_user_message(), Some("weather?"));
    }

    #[test]
    fn test_discard_leaves_no_trace() {
        let mut session = ChatSession::new("llama3");
        session.begin_turn(ChatMessage::user("hi"));
        session.push_delta("partial");
        session.discard_turn();
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_incomplete_status_serialization() {
        let msg = ChatMessage::assistant("He").incomplete("HTTP 500");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"]["incomplete"]["error"], "HTTP 500");

        let complete = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert!(complete.get("status").is_none());
        assert!(complete.get("sources").is_none());
        let back: ChatMessage = serde_json::from_value(complete).unwrap();
        assert!(back.status.is_complete());
    }

    #[test]
    fn test_llm_history_skips_empty() {
        let session = ChatSession::restore(
            "id",
            None,
            "m",
            0,
            vec![
                ChatMessage::user("q"),
                ChatMessage::assistant("").incomplete("boom"),
                ChatMessage::assistant("a"),
            ],
        );
        let history = session.llm_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "a");
    }
}
