//! searchlight - chat with a local LLM, grounded in live web search

mod config;
mod session;

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use searchlight_ai::{Backend, create_provider, providers::ollama::OllamaProvider};
use searchlight_chat::{ChatEvent, ChatMessage, ChatOrchestrator, ChatSession, Phase, TurnResult};
use searchlight_web::{HttpPageFetcher, SearxClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::session::SessionManager;

/// searchlight - search-augmented chat with a local LLM
#[derive(Parser, Debug)]
#[command(name = "searchlight")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: first model installed in Ollama)
    #[arg(short, long)]
    model: Option<String>,

    /// Backend protocol (ollama, openai)
    #[arg(short, long)]
    backend: Option<String>,

    /// LLM server URL
    #[arg(long)]
    base_url: Option<String>,

    /// SearXNG instance URL
    #[arg(long)]
    searx_url: Option<String>,

    /// Answer without web search
    #[arg(long)]
    no_web_search: bool,

    /// Verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Resume a previous session by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = config::Config::init().context("creating config file")?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    if args.sessions {
        return list_sessions();
    }

    // CLI flags take precedence over the file
    let mut cfg = config::Config::load();
    if args.backend.is_some() {
        cfg.backend = args.backend.clone();
    }
    if args.base_url.is_some() {
        cfg.base_url = args.base_url.clone();
    }
    if args.searx_url.is_some() {
        cfg.web.searx_url = args.searx_url.clone();
    }
    if args.no_web_search {
        cfg.web.enabled = Some(false);
    }

    let sessions_dir = SessionManager::sessions_dir();
    let (mut store, restored) = match args.resume {
        Some(ref id) => {
            let (store, session) = SessionManager::load(&sessions_dir, id)
                .with_context(|| format!("loading session {}", id))?;
            (Some(store), Some(session))
        }
        None => (None, None),
    };

    let model_id = match args.model.or(cfg.model.clone()) {
        Some(id) => id,
        None => match restored.as_ref().map(|s| s.model.clone()).filter(|m| !m.is_empty()) {
            Some(id) => id,
            None => default_model(&cfg).await?,
        },
    };

    let model = cfg.model(&model_id);
    let provider = create_provider(&model, cfg.api_key().as_deref());
    let search = Arc::new(SearxClient::new(cfg.searx())?);
    let fetcher = Arc::new(HttpPageFetcher::new()?);
    let chat_config = cfg.resolve();

    let session = restored.unwrap_or_else(|| ChatSession::new(model.id.clone()));
    if store.is_none() {
        store = SessionManager::create(&sessions_dir, &session)
            .map_err(|e| tracing::warn!("session will not be saved: {}", e))
            .ok();
    }

    if std::io::stderr().is_terminal() {
        let web = if chat_config.web.enable_web_search {
            "web search on"
        } else {
            "web search off"
        };
        let short_id = session.id.get(..8).unwrap_or(&session.id);
        eprintln!("searchlight ({}, {}) session: {}", model.id, web, short_id);
        if !session.messages().is_empty() {
            eprintln!("Resumed {} messages", session.messages().len());
        }
        eprintln!();
    }

    let chat = ChatOrchestrator::with_session(chat_config, model, provider, search, fetcher, session);
    run_interactive(&chat, store.as_mut()).await
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("searchlight=debug,searchlight_ai=debug,searchlight_web=debug,searchlight_chat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// First model installed in Ollama
async fn default_model(cfg: &config::Config) -> anyhow::Result<String> {
    if cfg.backend() != Backend::Ollama {
        anyhow::bail!("No model configured; pass --model or set `model` in the config file");
    }
    let models = OllamaProvider::new()
        .list_models(&cfg.base_url())
        .await
        .context("listing Ollama models")?;
    models
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No models installed in Ollama; run `ollama pull <model>`"))
}

async fn run_interactive(
    chat: &ChatOrchestrator,
    mut store: Option<&mut SessionManager>,
) -> anyhow::Result<()> {
    let mut events = chat.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let show_progress = std::io::stderr().is_terminal();

    loop {
        // Picks up titles that landed after the last turn
        sync_store(chat, store.as_deref_mut());
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" => break,
            "/sources" => {
                print_sources(chat.session().messages());
                continue;
            }
            _ => {}
        }

        println!();
        let turn = chat.start_turn(input);
        let turn_id = turn.id().to_string();

        // After a lag this turn's TurnEnd may be gone, so stop on completion
        let mut lagged = false;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    turn.cancel();
                }
                _ = turn.finished(), if lagged => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if render_event(event, &turn_id, show_progress) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("dropped {} chat events", n);
                        lagged = true;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if let TurnResult::Failed { error } = turn.wait().await {
            eprintln!("\nError: {}", error);
        }
        sync_store(chat, store.as_deref_mut());
        println!();
    }

    chat.cancel_turn();
    chat.wait_idle().await;
    sync_store(chat, store);
    Ok(())
}

/// Write new messages and title changes to the session file
fn sync_store(chat: &ChatOrchestrator, store: Option<&mut SessionManager>) {
    if let Some(store) = store {
        if let Err(e) = store.sync(&chat.session()) {
            tracing::warn!("failed to save session: {}", e);
        }
    }
}

/// Print one event. Returns true once the given turn has ended.
fn render_event(event: ChatEvent, turn_id: &str, show_progress: bool) -> bool {
    match event {
        ChatEvent::Progress { phase, detail, .. } => {
            if show_progress && !matches!(phase, Phase::Generating | Phase::Finalizing | Phase::Failed) {
                match detail {
                    Some(detail) => eprintln!("[{}: {}]", phase.label(), detail),
                    None => eprintln!("[{}]", phase.label()),
                }
            }
        }
        ChatEvent::TokenDelta { delta, .. } => {
            print!("{}", delta);
            std::io::stdout().flush().ok();
        }
        ChatEvent::MessageCommitted { message, .. } => {
            if message.role == searchlight_ai::Role::Assistant {
                println!();
                if let Some(ref notice) = message.notice {
                    eprintln!("[{}]", notice);
                }
                print_sources(std::slice::from_ref(&message));
            }
        }
        ChatEvent::TitleUpdated { title } => {
            if show_progress {
                eprintln!("[title: {}]", title);
            }
        }
        ChatEvent::TurnEnd {
            turn_id: id,
            result,
            usage,
        } => {
            if id == turn_id {
                if show_progress && result == TurnResult::Completed {
                    eprintln!("[{} in, {} out]", usage.input, usage.output);
                }
                return true;
            }
        }
        ChatEvent::TurnStart { .. } => {}
    }
    false
}

/// Print the citations of the last assistant message in `messages`
fn print_sources(messages: &[ChatMessage]) {
    let Some(last) = messages
        .iter()
        .rev()
        .find(|m| m.role == searchlight_ai::Role::Assistant)
    else {
        return;
    };
    if last.sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for (i, source) in last.sources.iter().enumerate() {
        println!("  [{}] {} - {}", i + 1, source.title, source.url);
    }
}

fn list_sessions() -> anyhow::Result<()> {
    let dir = SessionManager::sessions_dir();
    let sessions = SessionManager::list_sessions(&dir).context("listing sessions")?;
    if sessions.is_empty() {
        println!("No saved sessions found.");
        println!("Sessions are stored in: {}", dir.display());
        return Ok(());
    }

    println!("Saved sessions:\n");
    println!("{:<38} {:<18} {:<6} {:<20} Title", "ID", "Created", "Msgs", "Model");
    println!("{}", "-".repeat(100));
    for s in sessions {
        println!(
            "{:<38} {:<18} {:<6} {:<20} {}",
            s.id,
            s.created_at_display(),
            s.message_count,
            s.model,
            s.title.as_deref().unwrap_or("-")
        );
    }
    println!("\nResume with: searchlight --resume <session-id>");
    Ok(())
}
