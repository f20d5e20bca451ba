//! Chat event types

use serde::{Deserialize, Serialize};
use searchlight_ai::Usage;

use crate::session::ChatMessage;

/// Pipeline phase of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    Searching,
    Fetching,
    Assembling,
    Generating,
    Finalizing,
    Cancelled,
    Failed,
}

impl Phase {
    /// Short human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::Searching => "searching",
            Phase::Fetching => "reading pages",
            Phase::Assembling => "assembling context",
            Phase::Generating => "generating",
            Phase::Finalizing => "finalizing",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        }
    }

    /// Whether the turn ends in this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Cancelled | Phase::Failed)
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnResult {
    /// An answer was committed
    Completed,
    /// Generation failed; an incomplete message was committed
    Failed { error: String },
    /// Nothing was committed
    Cancelled,
}

/// Events pushed to the UI sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A turn was accepted
    TurnStart { turn_id: String, user_text: String },

    /// The turn moved to a new phase
    Progress {
        turn_id: String,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Streamed answer text, in arrival order
    TokenDelta { turn_id: String, delta: String },

    /// A message was appended to the session history
    MessageCommitted { turn_id: String, message: ChatMessage },

    /// The session got a title
    TitleUpdated { title: String },

    /// The turn finished
    TurnEnd {
        turn_id: String,
        result: TurnResult,
        usage: Usage,
    },
}

impl ChatEvent {
    /// Turn this event belongs to, if any
    pub fn turn_id(&self) -> Option<&str> {
        match self {
            ChatEvent::TurnStart { turn_id, .. }
            | ChatEvent::Progress { turn_id, .. }
            | ChatEvent::TokenDelta { turn_id, .. }
            | ChatEvent::MessageCommitted { turn_id, .. }
            | ChatEvent::TurnEnd { turn_id, .. } => Some(turn_id),
            ChatEvent::TitleUpdated { .. } => None,
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::TurnEnd { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_serializes_tagged() {
        let event = ChatEvent::Progress {
            turn_id: "t1".into(),
            phase: Phase::Fetching,
            detail: Some("reading 3 pages".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "fetching");
        assert_eq!(json["detail"], "reading 3 pages");
    }

    #[test]
    fn test_turn_end_roundtrip() {
        let event = ChatEvent::TurnEnd {
            turn_id: "t2".into(),
            result: TurnResult::Failed {
                error: "HTTP 500".into(),
            },
            usage: Usage::default(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert!(back.is_terminal());
        assert_eq!(back.turn_id(), Some("t2"));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Cancelled.is_terminal());
        assert!(!Phase::Generating.is_terminal());
        assert_eq!(Phase::Searching.label(), "searching");
    }
}
