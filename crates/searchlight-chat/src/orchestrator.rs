//! Turn orchestration: plan, search, fetch, assemble, generate

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use parking_lot::Mutex;
use searchlight_ai::{LlmProvider, Message, Model, StreamOptions, Usage};
use searchlight_web::{
    FetchLimits, PageFetcher, SearchEngine, SearchQuery, SearchResult, WebContext, assemble,
    fetch_all, interleave_results,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::{ChatEvent, Phase, TurnResult},
    generation::{GenerationOutcome, GenerationTask, GenerationWorker, RetryConfig},
    planner::{DEFAULT_TRANSCRIPT_CHARS, PlanLimits, PlanResult, SearchPlanner},
    prompt::build_generation_context,
    session::{ChatMessage, ChatSession, MessageStatus},
    title::{fallback_title, generate_title},
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default bound on background title generation
pub const DEFAULT_TITLE_TIMEOUT_MS: u64 = 30_000;

/// Annotation on answers produced while search was down
pub const SEARCH_UNAVAILABLE_NOTICE: &str = "Web search was unavailable; answered without web results.";

/// What to do when the planner fails or times out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlannerFallback {
    /// Answer without searching
    #[default]
    NoSearch,
    /// Search with the raw user message
    RawQuery,
}

/// What to do when every search query failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchFailurePolicy {
    /// Answer without web results, annotating the message
    #[default]
    Continue,
    /// End the turn as failed
    Abort,
}

/// Web search settings consumed by the pipeline
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub enable_web_search: bool,
    /// Merged results kept per turn
    pub max_search_results: usize,
    /// Pages fetched per turn
    pub max_pages_fetched: usize,
    /// Size cap of the assembled context, in UTF-8 bytes
    pub context_token_budget: usize,
    /// Timeout for each search and page fetch
    pub per_request_timeout_ms: u64,
    pub use_planner: bool,
    pub planner_timeout_ms: u64,
    pub planner_fallback: PlannerFallback,
    pub search_failure_policy: SearchFailurePolicy,
    pub max_queries: usize,
    /// Requests in flight at once, for both searches and fetches
    pub concurrency: usize,
    pub max_page_bytes: usize,
    pub max_chars_per_page: usize,
    /// Include the queries in the Searching progress detail
    pub show_query: bool,
    /// Tell the model to answer only from the web results
    pub strict_web_only: bool,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enable_web_search: true,
            max_search_results: 10,
            max_pages_fetched: 5,
            context_token_budget: 12_000,
            per_request_timeout_ms: 10_000,
            use_planner: true,
            planner_timeout_ms: 20_000,
            planner_fallback: PlannerFallback::NoSearch,
            search_failure_policy: SearchFailurePolicy::Continue,
            max_queries: 3,
            concurrency: 4,
            max_page_bytes: 512 * 1024,
            max_chars_per_page: 6_000,
            show_query: true,
            strict_web_only: true,
        }
    }
}

impl WebSearchConfig {
    pub fn per_request_timeout(&self) -> Duration {
        Duration::from_millis(self.per_request_timeout_ms)
    }

    pub fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            max_bytes: self.max_page_bytes,
            timeout: self.per_request_timeout(),
            max_text_chars: self.max_chars_per_page,
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Sampling options for answers
    pub options: StreamOptions,
    pub web: WebSearchConfig,
    /// Generate a title after the first answer
    pub auto_title: bool,
    pub retry: RetryConfig,
    /// Characters of history shown to the planner
    pub transcript_chars: usize,
    /// Give up on the model's title after this long and use the first message
    pub title_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(crate::prompt::DEFAULT_SYSTEM_PROMPT.to_string()),
            options: StreamOptions::chat(),
            web: WebSearchConfig::default(),
            auto_title: true,
            retry: RetryConfig::default(),
            transcript_chars: DEFAULT_TRANSCRIPT_CHARS,
            title_timeout_ms: DEFAULT_TITLE_TIMEOUT_MS,
        }
    }
}

/// Web material gathered for one turn
#[derive(Debug, Default)]
struct WebTurn {
    context: Option<(WebContext, Vec<SearchQuery>)>,
    notice: Option<String>,
}

/// The turn currently allowed to run
struct ActiveTurn {
    id: String,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Handle to a started turn
pub struct TurnHandle {
    id: String,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    join: JoinHandle<TurnResult>,
}

impl TurnHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancel this turn. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the turn has ended, without consuming the handle.
    /// Every event of the turn has been sent by then.
    pub async fn finished(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|d| *d).await;
    }

    /// Wait for the turn to end
    pub async fn wait(self) -> TurnResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => TurnResult::Failed {
                error: format!("turn task failed: {}", e),
            },
        }
    }
}

struct Inner {
    config: ChatConfig,
    model: Model,
    provider: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchEngine>,
    fetcher: Arc<dyn PageFetcher>,
    planner: SearchPlanner,
    worker: GenerationWorker,
    session: Mutex<ChatSession>,
    active: Mutex<Option<ActiveTurn>>,
    title_task: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<ChatEvent>,
}

/// Coordinates turns for one chat session.
///
/// At most one turn runs at a time: starting a turn cancels the previous one
/// and waits for it to wind down before planning. Progress is pushed to
/// subscribers; the only calls in are [`start_turn`](Self::start_turn) and
/// [`cancel_turn`](Self::cancel_turn).
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
}

impl ChatOrchestrator {
    /// Create an orchestrator with a fresh session
    pub fn new(
        config: ChatConfig,
        model: Model,
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchEngine>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let session = ChatSession::new(model.id.clone());
        Self::with_session(config, model, provider, search, fetcher, session)
    }

    /// Create an orchestrator continuing an existing session
    pub fn with_session(
        config: ChatConfig,
        model: Model,
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchEngine>,
        fetcher: Arc<dyn PageFetcher>,
        session: ChatSession,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let web = &config.web;
        let planner = SearchPlanner::new(
            Arc::clone(&provider),
            model.clone(),
            PlanLimits {
                max_queries: web.max_queries,
                max_results: web.max_search_results,
            },
        )
        .with_timeout(Duration::from_millis(web.planner_timeout_ms))
        .with_transcript_chars(config.transcript_chars);
        let worker = GenerationWorker::new(Arc::clone(&provider), model.clone())
            .with_options(config.options.clone())
            .with_retry_config(config.retry.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                model,
                provider,
                search,
                fetcher,
                planner,
                worker,
                session: Mutex::new(session),
                active: Mutex::new(None),
                title_task: Mutex::new(None),
                event_tx,
            }),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    /// Copy of the session state
    pub fn session(&self) -> ChatSession {
        self.inner.session.lock().clone()
    }

    /// Messages as the UI should show them, including the in-flight answer
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.session.lock().snapshot()
    }

    /// Whether a turn is running
    pub fn is_busy(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Start a turn for `user_text`, cancelling any turn still running
    pub fn start_turn(&self, user_text: impl Into<String>) -> TurnHandle {
        let user_text = user_text.into();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let previous = self.inner.active.lock().replace(ActiveTurn {
            id: turn_id.clone(),
            cancel: cancel.clone(),
            done: done_rx.clone(),
        });
        if let Some(ref previous) = previous {
            tracing::debug!(previous = %previous.id, next = %turn_id, "superseding running turn");
            previous.cancel.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let id = turn_id.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            if let Some(mut previous) = previous.map(|p| p.done) {
                let _ = previous.wait_for(|done| *done).await;
            }
            let result = inner.run_turn(&id, &user_text, &token).await;
            inner.clear_active(&id);
            let _ = done_tx.send(true);
            result
        });

        TurnHandle {
            id: turn_id,
            cancel,
            done: done_rx,
            join,
        }
    }

    /// Cancel the running turn, if any. Idempotent.
    pub fn cancel_turn(&self) {
        if let Some(ref active) = *self.inner.active.lock() {
            active.cancel.cancel();
        }
    }

    /// Wait until no turn is running and any pending title has landed
    pub async fn wait_idle(&self) {
        let done = self.inner.active.lock().as_ref().map(|a| a.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|d| *d).await;
        }
        let title_task = self.inner.title_task.lock().take();
        if let Some(task) = title_task {
            if let Err(e) = task.await {
                tracing::warn!("title task failed: {}", e);
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    fn progress(&self, turn_id: &str, phase: Phase, detail: Option<String>) {
        tracing::debug!(turn = %turn_id, phase = ?phase, detail = detail.as_deref().unwrap_or(""), "turn progress");
        self.emit(ChatEvent::Progress {
            turn_id: turn_id.to_string(),
            phase,
            detail,
        });
    }

    fn clear_active(&self, turn_id: &str) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == turn_id) {
            *active = None;
        }
    }

    async fn run_turn(self: &Arc<Self>, turn_id: &str, user_text: &str, cancel: &CancellationToken) -> TurnResult {
        self.emit(ChatEvent::TurnStart {
            turn_id: turn_id.to_string(),
            user_text: user_text.to_string(),
        });

        let history = {
            let mut session = self.session.lock();
            let history = session.llm_history();
            session.begin_turn(ChatMessage::user(user_text));
            history
        };

        if cancel.is_cancelled() {
            return self.finish_cancelled(turn_id);
        }

        let web = match self.gather_web_context(turn_id, user_text, &history, cancel).await {
            Ok(web) => web,
            Err(e) if e.is_cancelled() => return self.finish_cancelled(turn_id),
            Err(e) => {
                tracing::warn!(turn = %turn_id, "aborting turn: {}", e);
                return self.finish_failed(turn_id, String::new(), e.to_string(), Vec::new(), None, Usage::default());
            }
        };

        let sources = web
            .context
            .as_ref()
            .map(|(ctx, _)| ctx.citations.clone())
            .unwrap_or_default();
        let detail = (!sources.is_empty()).then(|| format!("answering with {} sources", sources.len()));
        self.progress(turn_id, Phase::Generating, detail);

        let context = build_generation_context(
            self.config.system_prompt.as_deref(),
            &history,
            user_text,
            web.context.as_ref().map(|(ctx, queries)| (ctx, queries.as_slice())),
            self.config.web.strict_web_only,
        );

        let task = GenerationTask::child_of(cancel);
        let outcome = self
            .worker
            .generate(
                &context,
                |delta| {
                    self.session.lock().push_delta(delta);
                    self.emit(ChatEvent::TokenDelta {
                        turn_id: turn_id.to_string(),
                        delta: delta.to_string(),
                    });
                },
                &task,
            )
            .await;

        match outcome {
            GenerationOutcome::Completed { text, usage } => {
                self.progress(turn_id, Phase::Finalizing, None);
                self.commit(turn_id, text, sources, MessageStatus::Complete, web.notice);
                self.emit(ChatEvent::TurnEnd {
                    turn_id: turn_id.to_string(),
                    result: TurnResult::Completed,
                    usage,
                });
                self.maybe_generate_title();
                TurnResult::Completed
            }
            GenerationOutcome::Failed { partial, error } => {
                tracing::warn!(turn = %turn_id, "generation failed: {}", error);
                let error = Error::GenerationBackendError(error).to_string();
                self.finish_failed(turn_id, partial, error, sources, web.notice, Usage::default())
            }
            GenerationOutcome::Cancelled { .. } => self.finish_cancelled(turn_id),
        }
    }

    /// Planning through assembly. Failures degrade to "no web context" unless
    /// the search failure policy says to abort.
    async fn gather_web_context(
        &self,
        turn_id: &str,
        user_text: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<WebTurn> {
        let web = &self.config.web;
        if !web.enable_web_search {
            return Ok(WebTurn::default());
        }

        self.progress(turn_id, Phase::Planning, None);
        let plan = if web.use_planner {
            match self.planner.try_plan(user_text, history, cancel).await {
                Ok(plan) => plan,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(turn = %turn_id, fallback = ?web.planner_fallback, "planner failed: {}", e);
                    match web.planner_fallback {
                        PlannerFallback::NoSearch => PlanResult::NoSearch,
                        PlannerFallback::RawQuery => {
                            PlanResult::raw_query(user_text, web.max_search_results)
                        }
                    }
                }
            }
        } else {
            PlanResult::raw_query(user_text, web.max_search_results)
        };

        let PlanResult::Search {
            queries,
            max_results,
        } = plan
        else {
            tracing::debug!(turn = %turn_id, "no search needed");
            return Ok(WebTurn::default());
        };

        let detail = if web.show_query {
            let list: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
            format!("searching: {}", list.join(" | "))
        } else {
            "searching the web".to_string()
        };
        self.progress(turn_id, Phase::Searching, Some(detail));

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcomes = self.run_searches(&queries, max_results) => outcomes,
        };

        let mut lists = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (query, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(results) => lists.push(results),
                Err(e) => {
                    tracing::warn!(query = %query.text, "search failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if lists.is_empty() {
            let reason = failures.join("; ");
            return match web.search_failure_policy {
                SearchFailurePolicy::Abort => Err(Error::SearchBackendUnavailable(reason)),
                SearchFailurePolicy::Continue => Ok(WebTurn {
                    context: None,
                    notice: Some(SEARCH_UNAVAILABLE_NOTICE.to_string()),
                }),
            };
        }

        let results = interleave_results(lists, max_results);
        if results.is_empty() {
            tracing::debug!(turn = %turn_id, "search returned no results");
            return Ok(WebTurn::default());
        }

        let urls: Vec<String> = results
            .iter()
            .take(web.max_pages_fetched)
            .map(|r| r.url.clone())
            .collect();
        self.progress(
            turn_id,
            Phase::Fetching,
            Some(format!("reading {} pages", urls.len())),
        );

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            fetched = fetch_all(self.fetcher.as_ref(), &urls, web.fetch_limits(), web.concurrency) => fetched,
        };
        let pages: Vec<_> = fetched.into_iter().filter_map(|(_, r)| r.ok()).collect();

        self.progress(
            turn_id,
            Phase::Assembling,
            Some(format!("{} of {} pages readable", pages.len(), urls.len())),
        );
        let context = assemble(&pages, &results, web.context_token_budget);
        if context.is_empty() {
            return Ok(WebTurn::default());
        }
        Ok(WebTurn {
            context: Some((context, queries)),
            notice: None,
        })
    }

    async fn run_searches(
        &self,
        queries: &[SearchQuery],
        limit: usize,
    ) -> Vec<searchlight_web::Result<Vec<SearchResult>>> {
        // Built up front so the buffered stream holds plain futures, keeping
        // the turn future Send.
        let searches: Vec<_> = queries
            .iter()
            .map(|query| self.search.try_search(query, limit))
            .collect();
        stream::iter(searches)
            .buffered(self.config.web.concurrency.max(1))
            .collect()
            .await
    }

    fn commit(
        &self,
        turn_id: &str,
        content: String,
        sources: Vec<searchlight_web::Citation>,
        status: MessageStatus,
        notice: Option<String>,
    ) {
        let committed = self
            .session
            .lock()
            .finalize_turn(content, sources, status, notice);
        for message in committed {
            self.emit(ChatEvent::MessageCommitted {
                turn_id: turn_id.to_string(),
                message,
            });
        }
    }

    fn finish_failed(
        &self,
        turn_id: &str,
        partial: String,
        error: String,
        sources: Vec<searchlight_web::Citation>,
        notice: Option<String>,
        usage: Usage,
    ) -> TurnResult {
        self.progress(turn_id, Phase::Finalizing, None);
        self.commit(
            turn_id,
            partial,
            sources,
            MessageStatus::Incomplete {
                error: error.clone(),
            },
            notice,
        );
        self.progress(turn_id, Phase::Failed, Some(error.clone()));
        let result = TurnResult::Failed { error };
        self.emit(ChatEvent::TurnEnd {
            turn_id: turn_id.to_string(),
            result: result.clone(),
            usage,
        });
        result
    }

    fn finish_cancelled(&self, turn_id: &str) -> TurnResult {
        tracing::debug!(turn = %turn_id, "turn cancelled");
        self.session.lock().discard_turn();
        self.progress(turn_id, Phase::Cancelled, None);
        self.emit(ChatEvent::TurnEnd {
            turn_id: turn_id.to_string(),
            result: TurnResult::Cancelled,
            usage: Usage::default(),
        });
        TurnResult::Cancelled
    }

    /// Title the session in the background after its first answer
    fn maybe_generate_title(self: &Arc<Self>) {
        if !self.config.auto_title {
            return;
        }
        let first = {
            let session = self.session.lock();
            if session.title.is_some() {
                return;
            }
            match session.first_user_message() {
                Some(first) => first.to_string(),
                None => return,
            }
        };

        let mut title_task = self.title_task.lock();
        if title_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let inner = Arc::clone(self);
        let limit = Duration::from_millis(self.config.title_timeout_ms);
        *title_task = Some(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let title = match tokio::time::timeout(
                limit,
                generate_title(inner.provider.as_ref(), &inner.model, &first, &cancel),
            )
            .await
            {
                Ok(title) => title,
                Err(_) => {
                    tracing::debug!("title generation timed out");
                    fallback_title(&first)
                }
            };
            {
                let mut session = inner.session.lock();
                if session.title.is_some() {
                    return;
                }
                session.title = Some(title.clone());
            }
            tracing::debug!(title = %title, "session titled");
            inner.emit(ChatEvent::TitleUpdated { title });
        }));
    }
}
