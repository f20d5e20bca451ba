//! searchlight-chat: search-augmented chat pipeline
//!
//! This crate provides the per-session orchestrator that decides whether to
//! search the web, gathers and bounds the web context, and streams the LLM
//! answer with cancellation of superseded turns.

pub mod error;
pub mod events;
pub mod generation;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod session;
pub mod title;

pub use error::{Error, Result};
pub use events::{ChatEvent, Phase, TurnResult};
pub use generation::{GenerationOutcome, GenerationState, GenerationTask, GenerationWorker, RetryConfig};
pub use orchestrator::{
    ChatConfig, ChatOrchestrator, PlannerFallback, SearchFailurePolicy, TurnHandle,
    WebSearchConfig,
};
pub use planner::{PlanLimits, PlanResult, SearchPlanner, parse_plan};
pub use session::{ChatMessage, ChatSession, MessageStatus};
pub use title::generate_title;
