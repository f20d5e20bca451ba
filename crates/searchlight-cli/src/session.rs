//! Session persistence as JSONL files

use serde::{Deserialize, Serialize};
use searchlight_chat::{ChatMessage, ChatSession};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Session entry types for JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    /// Session metadata, always the first line
    Metadata {
        id: String,
        created_at: i64,
        model: String,
    },
    /// A finalized message
    Message { message: ChatMessage },
    /// The session was (re)titled
    Title { title: String },
}

/// Summary of a stored session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: i64,
    pub model: String,
    pub title: Option<String>,
    pub message_count: usize,
}

impl SessionInfo {
    pub fn created_at_display(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.created_at)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Appends finalized messages of one session to its file
pub struct SessionManager {
    id: String,
    writer: BufWriter<File>,
    /// Messages already in the file
    saved_messages: usize,
    saved_title: Option<String>,
}

impl SessionManager {
    /// Get the sessions directory
    pub fn sessions_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("searchlight")
            .join("sessions")
    }

    fn session_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.jsonl", id))
    }

    /// Start a file for `session` in `dir`, writing its metadata and any
    /// messages it already holds
    pub fn create(dir: &Path, session: &ChatSession) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = File::create(Self::session_path(dir, &session.id))?;
        let mut manager = Self {
            id: session.id.clone(),
            writer: BufWriter::new(file),
            saved_messages: 0,
            saved_title: None,
        };

        manager.write_entry(&SessionEntry::Metadata {
            id: session.id.clone(),
            created_at: session.created_at,
            model: session.model.clone(),
        })?;
        if let Some(ref title) = session.title {
            manager.append_title(title)?;
        }
        for message in session.messages() {
            manager.append_message(message)?;
        }
        Ok(manager)
    }

    /// Load session `id` from `dir` and open it for appending
    pub fn load(dir: &Path, id: &str) -> std::io::Result<(Self, ChatSession)> {
        let path = Self::session_path(dir, id);
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Session not found: {}", id),
            ));
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut created_at = chrono::Utc::now().timestamp_millis();
        let mut model = String::new();
        let mut title = None;
        let mut messages = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(SessionEntry::Metadata {
                    created_at: at,
                    model: m,
                    ..
                }) => {
                    created_at = at;
                    model = m;
                }
                Ok(SessionEntry::Message { message }) => messages.push(message),
                Ok(SessionEntry::Title { title: t }) => title = Some(t),
                Err(e) => tracing::warn!(session = %id, "skipping unreadable entry: {}", e),
            }
        }

        let file = File::options().append(true).open(&path)?;
        let manager = Self {
            id: id.to_string(),
            writer: BufWriter::new(file),
            saved_messages: messages.len(),
            saved_title: title.clone(),
        };
        let session = ChatSession::restore(id, title, model, created_at, messages);
        Ok((manager, session))
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a finalized message
    pub fn append_message(&mut self, message: &ChatMessage) -> std::io::Result<()> {
        self.write_entry(&SessionEntry::Message {
            message: message.clone(),
        })?;
        self.saved_messages += 1;
        Ok(())
    }

    /// Record a new title
    pub fn append_title(&mut self, title: &str) -> std::io::Result<()> {
        self.write_entry(&SessionEntry::Title {
            title: title.to_string(),
        })?;
        self.saved_title = Some(title.to_string());
        Ok(())
    }

    /// Write whatever `session` holds that the file does not yet:
    /// newly committed messages and a changed title.
    pub fn sync(&mut self, session: &ChatSession) -> std::io::Result<()> {
        let messages = session.messages();
        for message in messages.iter().skip(self.saved_messages) {
            self.append_message(message)?;
        }
        if let Some(ref title) = session.title {
            if self.saved_title.as_deref() != Some(title.as_str()) {
                self.append_title(title)?;
            }
        }
        Ok(())
    }

    fn write_entry(&mut self, entry: &SessionEntry) -> std::io::Result<()> {
        writeln!(self.writer, "{}", serde_json::to_string(entry)?)?;
        self.writer.flush()
    }

    /// List sessions in `dir`, newest first
    pub fn list_sessions(dir: &Path) -> std::io::Result<Vec<SessionInfo>> {
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(info) = Self::read_session_info(&path) {
                    sessions.push(info);
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    fn read_session_info(path: &Path) -> Option<SessionInfo> {
        let reader = BufReader::new(File::open(path).ok()?);
        let mut lines = reader.lines();

        let first_line = lines.next()?.ok()?;
        let SessionEntry::Metadata {
            id,
            created_at,
            model,
        } = serde_json::from_str(&first_line).ok()?
        else {
            return None;
        };

        let mut title = None;
        let mut message_count = 0;
        for line in lines.map_while(Result::ok) {
            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(SessionEntry::Message { .. }) => message_count += 1,
                Ok(SessionEntry::Title { title: t }) => title = Some(t),
                _ => {}
            }
        }

        Some(SessionInfo {
            id,
            created_at,
            model,
            title,
            message_count,
        })
    }
}
