//! Search decision planning: asks the model whether a turn needs the web

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use searchlight_ai::{Context, LlmProvider, Message, Model, Role, StreamOptions};
use searchlight_web::SearchQuery;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

const PLANNER_SYSTEM_PROMPT: &str = "\
You are a search query planner for a chat assistant.
Decide whether answering the user's most recent message needs current or \
external information from the web. Greetings, opinions, creative writing, \
math and questions answerable from general knowledge do not.

Respond with ONLY a JSON object, no prose:
{\"search\": true|false, \"queries\": [{\"query\": \"...\", \"rationale\": \"...\"}], \"max_results\": N}

Use at most {MAX_QUERIES} short, specific queries. Omit \"queries\" when \"search\" is false.";

const PLANNER_MAX_TOKENS: u32 = 256;

/// Default characters of transcript shown to the planner
pub const DEFAULT_TRANSCRIPT_CHARS: usize = 8_000;

static PLAN_SCHEMA: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["search"],
        "properties": {
            "search": { "type": "boolean" },
            "queries": {
                "type": "array",
                "items": {
                    "anyOf": [
                        { "type": "string" },
                        {
                            "type": "object",
                            "required": ["query"],
                            "properties": {
                                "query": { "type": "string" },
                                "rationale": { "type": ["string", "null"] }
                            }
                        }
                    ]
                }
            },
            "max_results": { "type": ["integer", "null"] }
        }
    });
    match jsonschema::validator_for(&schema) {
        Ok(validator) => Some(validator),
        Err(e) => {
            tracing::warn!("Invalid planner schema, skipping validation: {}", e);
            None
        }
    }
});

/// Caps applied to a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_queries: usize,
    /// Upper bound for the result count a plan may ask for
    pub max_results: usize,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_queries: 3,
            max_results: 10,
        }
    }
}

/// Outcome of planning one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult {
    NoSearch,
    Search {
        queries: Vec<SearchQuery>,
        max_results: usize,
    },
}

impl PlanResult {
    /// Plan that searches the raw user text
    pub fn raw_query(text: &str, max_results: usize) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return PlanResult::NoSearch;
        }
        PlanResult::Search {
            queries: vec![SearchQuery::new(text)],
            max_results: max_results.max(1),
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self, PlanResult::Search { .. })
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    search: bool,
    #[serde(default)]
    queries: Vec<RawQuery>,
    #[serde(default)]
    max_results: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuery {
    Text(String),
    Detailed {
        query: String,
        #[serde(default)]
        rationale: Option<String>,
    },
}

/// Parse and validate planner output.
///
/// Tolerates Markdown fences and prose around the JSON object. Queries are
/// trimmed, deduplicated (case-insensitive) and capped; `max_results` is
/// clamped into `1..=limits.max_results`. A search plan with no usable query
/// becomes `NoSearch`.
pub fn parse_plan(raw: &str, limits: &PlanLimits) -> Result<PlanResult> {
    let json = extract_json_object(raw)
        .ok_or_else(|| Error::PlannerOutput("no JSON object in planner output".to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| Error::PlannerOutput(e.to_string()))?;

    if let Some(ref validator) = *PLAN_SCHEMA {
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(Error::PlannerOutput(errors.join("; ")));
        }
    }

    let plan: RawPlan =
        serde_json::from_value(value).map_err(|e| Error::PlannerOutput(e.to_string()))?;
    if !plan.search {
        return Ok(PlanResult::NoSearch);
    }

    let mut seen = HashSet::new();
    let queries: Vec<SearchQuery> = plan
        .queries
        .into_iter()
        .filter_map(|q| {
            let (text, rationale) = match q {
                RawQuery::Text(text) => (text, None),
                RawQuery::Detailed { query, rationale } => (query, rationale),
            };
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() || !seen.insert(text.to_lowercase()) {
                return None;
            }
            let query = SearchQuery::new(text);
            Some(match rationale.filter(|r| !r.trim().is_empty()) {
                Some(r) => query.with_rationale(r.trim()),
                None => query,
            })
        })
        .take(limits.max_queries.max(1))
        .collect();

    if queries.is_empty() {
        return Ok(PlanResult::NoSearch);
    }

    let ceiling = limits.max_results.max(1);
    let max_results = plan
        .max_results
        .map(|n| n.clamp(1, ceiling as i64) as usize)
        .unwrap_or(ceiling);

    Ok(PlanResult::Search {
        queries,
        max_results,
    })
}

/// Slice from the first `{` to the last `}`
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Render history as a `You:` / `Model:` transcript, keeping the most recent
/// `max_chars` characters.
pub fn format_transcript(history: &[Message], max_chars: usize) -> String {
    let text = history
        .iter()
        .filter_map(|m| {
            let content = m.content.trim();
            if content.is_empty() {
                return None;
            }
            match m.role {
                Role::User => Some(format!("You: {}", content)),
                Role::Assistant => Some(format!("Model: {}", content)),
                Role::System => None,
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    text.chars().skip(total - max_chars).collect()
}

/// LLM-backed planner
pub struct SearchPlanner {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    limits: PlanLimits,
    timeout: Duration,
    transcript_chars: usize,
}

impl SearchPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model, limits: PlanLimits) -> Self {
        Self {
            provider,
            model,
            limits,
            timeout: Duration::from_secs(20),
            transcript_chars: DEFAULT_TRANSCRIPT_CHARS,
        }
    }

    /// Set the planner call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transcript character limit
    pub fn with_transcript_chars(mut self, chars: usize) -> Self {
        self.transcript_chars = chars;
        self
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    fn build_context(&self, user_message: &str, history: &[Message]) -> Context {
        let mut turns = history.to_vec();
        turns.push(Message::user(user_message));
        let transcript = format_transcript(&turns, self.transcript_chars);

        let system = PLANNER_SYSTEM_PROMPT.replace("{MAX_QUERIES}", &self.limits.max_queries.to_string());
        let mut context = Context::with_system(system);
        context.push(Message::user(format!(
            "Conversation so far:\n\n{}\n\nReturn the JSON plan for the last user message.",
            transcript
        )));
        context
    }

    /// Plan a turn, surfacing timeouts, backend errors and malformed output
    pub async fn try_plan(
        &self,
        user_message: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<PlanResult> {
        let context = self.build_context(user_message, history);
        let options = StreamOptions::deterministic(PLANNER_MAX_TOKENS);
        let call = self.provider.complete(&self.model, &context, &options);

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(text) => text?,
                Err(_) => return Err(Error::PlannerTimeout(self.timeout)),
            },
        };

        tracing::debug!(raw = %raw, "planner output");
        parse_plan(&raw, &self.limits)
    }

    /// Plan a turn; any failure other than cancellation becomes `NoSearch`
    pub async fn plan(
        &self,
        user_message: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<PlanResult> {
        match self.try_plan(user_message, history, cancel).await {
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!("Planner failed, continuing without search: {}", e);
                Ok(PlanResult::NoSearch)
            }
            ok => ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use searchlight_ai::{MessageEvent, MessageEventStream, StopReason, Usage};

    fn limits() -> PlanLimits {
        PlanLimits {
            max_queries: 3,
            max_results: 5,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let plan = parse_plan(
            r#"{"search": true, "queries": [{"query": "weather Paris tomorrow", "rationale": "forecast"}], "max_results": 5}"#,
            &limits(),
        )
        .unwrap();
        match plan {
            PlanResult::Search {
                queries,
                max_results,
            } => {
                assert_eq!(queries.len(), 1);
                assert_eq!(queries[0].text, "weather Paris tomorrow");
                assert_eq!(queries[0].rationale.as_deref(), Some("forecast"));
                assert_eq!(max_results, 5);
            }
            PlanResult::NoSearch => panic!("expected a search plan"),
        }
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let raw = "Sure! Here is the plan:\n```json\n{\"search\": false}\n```\nLet me know.";
        assert_eq!(parse_plan(raw, &limits()).unwrap(), PlanResult::NoSearch);
    }

    #[test]
    fn test_parse_caps_and_dedups_queries() {
        let raw = r#"{"search": true, "queries": ["a", " A ", "", "b", {"query": "c"}, "d"]}"#;
        let PlanResult::Search {
            queries,
            max_results,
        } = parse_plan(raw, &limits()).unwrap()
        else {
            panic!("expected a search plan");
        };
        let texts: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(max_results, 5);
    }

    #[test]
    fn test_parse_clamps_max_results() {
        let raw = r#"{"search": true, "queries": ["x"], "max_results": 50}"#;
        let PlanResult::Search { max_results, .. } = parse_plan(raw, &limits()).unwrap() else {
            panic!("expected a search plan");
        };
        assert_eq!(max_results, 5);

        let raw = r#"{"search": true, "queries": ["x"], "max_results": 0}"#;
        let PlanResult::Search { max_results, .. } = parse_plan(raw, &limits()).unwrap() else {
            panic!("expected a search plan");
        };
        assert_eq!(max_results, 1);
    }

    #[test]
    fn test_parse_search_without_queries_is_no_search() {
        let raw = r#"{"search": true, "queries": ["   "]}"#;
        assert_eq!(parse_plan(raw, &limits()).unwrap(), PlanResult::NoSearch);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            parse_plan("weather Paris tomorrow", &limits()),
            Err(Error::PlannerOutput(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"queries": ["x"]}"#, &limits()),
            Err(Error::PlannerOutput(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"search": "yes"}"#, &limits()),
            Err(Error::PlannerOutput(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"search": true, "queries": [42]}"#, &limits()),
            Err(Error::PlannerOutput(_))
        ));
    }

    #[test]
    fn test_format_transcript() {
        let history = vec![
            Message::system("ignored"),
            Message::user("  first  "),
            Message::assistant("reply"),
            Message::user(""),
        ];
        assert_eq!(format_transcript(&history, 100), "You: first\nModel: reply");
        assert_eq!(format_transcript(&history, 5), "reply");
    }

    #[test]
    fn test_raw_query_plan() {
        assert_eq!(PlanResult::raw_query("  ", 5), PlanResult::NoSearch);
        assert!(PlanResult::raw_query("rust async", 5).is_search());
    }

    /// Provider that answers with fixed text after an optional delay
    struct ScriptedProvider {
        reply: String,
        delay: Duration,
        contexts: Mutex<Vec<Context>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(
            &self,
            _model: &Model,
            context: &Context,
            _options: &StreamOptions,
        ) -> searchlight_ai::Result<MessageEventStream> {
            self.contexts.lock().push(context.clone());
            let reply = self.reply.clone();
            let delay = self.delay;
            Ok(Box::pin(async_stream::stream! {
                tokio::time::sleep(delay).await;
                yield MessageEvent::TextDelta { delta: reply.clone() };
                yield MessageEvent::Done {
                    text: reply,
                    stop_reason: StopReason::Stop,
                    usage: Usage::default(),
                };
            }))
        }
    }

    fn planner(reply: &str, delay: Duration) -> (SearchPlanner, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider {
            reply: reply.to_string(),
            delay,
            contexts: Mutex::new(Vec::new()),
        });
        let planner = SearchPlanner::new(provider.clone(), Model::ollama("llama3"), limits())
            .with_timeout(Duration::from_millis(100));
        (planner, provider)
    }

    #[tokio::test]
    async fn test_plan_sends_transcript() {
        let (planner, provider) = planner(r#"{"search": false}"#, Duration::ZERO);
        let history = vec![Message::user("hello"), Message::assistant("hi there")];
        let plan = planner
            .plan("what's new in rust?", &history, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan, PlanResult::NoSearch);

        let contexts = provider.contexts.lock();
        let prompt = &contexts[0].messages[0].content;
        assert!(prompt.contains("You: hello\nModel: hi there\nYou: what's new in rust?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_timeout_falls_back_to_no_search() {
        let (planner, _) = planner(r#"{"search": true, "queries": ["x"]}"#, Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let err = planner.try_plan("q", &[], &cancel).await.unwrap_err();
        assert!(matches!(err, Error::PlannerTimeout(_)));
        assert_eq!(planner.plan("q", &[], &cancel).await.unwrap(), PlanResult::NoSearch);
    }

    #[tokio::test]
    async fn test_plan_cancelled() {
        let (planner, _) = planner(r#"{"search": false}"#, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = planner.plan("q", &[], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_plan_malformed_output_is_no_search() {
        let (planner, _) = planner("I think you should search for cats", Duration::ZERO);
        let plan = planner.plan("q", &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(plan, PlanResult::NoSearch);
    }
}
