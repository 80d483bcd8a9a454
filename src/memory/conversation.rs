//! Conversation memory with token budgeting, summarization and JSON
//! persistence.
//!
//! Turns are kept in insertion order and capped at `max_history`; the oldest
//! are dropped first. Token counts are computed once when a turn is added.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tokens::{default_estimator, TokenEstimator};

/// Default hard cap on stored turns.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Number of most recent turns `summarize` keeps verbatim.
pub const KEEP_RECENT: usize = 10;

/// Characters of each collapsed turn kept in the summary digest.
pub const SNIPPET_CHARS: usize = 100;

/// Version written to session files.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// Conversation memory errors.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Session file not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid session file format: {0}")]
    InvalidFormat(PathBuf),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Unix time in seconds.
    #[serde(default)]
    pub timestamp: f64,
    /// Token estimate cached at insertion.
    #[serde(default, rename = "tokens")]
    pub token_count: usize,
}

/// A turn as handed to the model: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ContextMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Summary counters for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub message_count: usize,
    pub total_tokens: usize,
    pub max_history: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionFileOut<'a> {
    version: u32,
    saved_at: f64,
    max_history: usize,
    messages: &'a [Turn],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFileIn {
    #[serde(default)]
    max_history: Option<usize>,
    #[serde(default, alias = "turns")]
    messages: Option<Vec<Turn>>,
}

fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Bounded, token-budgeted conversation log.
///
/// Owned by a single orchestration loop; callers sharing it across tasks
/// must synchronise externally.
///
/// # Example
/// ```rust
/// use aria_runtime::memory::{ConversationMemory, Role};
///
/// let mut memory = ConversationMemory::new(100);
/// memory.add_message(Role::User, "What's the weather?");
/// memory.add_message(Role::Assistant, "72°F and sunny.");
/// let window = memory.get_context_window(4000);
/// assert_eq!(window.len(), 2);
/// ```
pub struct ConversationMemory {
    max_history: usize,
    turns: Vec<Turn>,
    estimator: Box<dyn TokenEstimator>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl fmt::Debug for ConversationMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationMemory")
            .field("max_history", &self.max_history)
            .field("turns", &self.turns.len())
            .finish_non_exhaustive()
    }
}

impl ConversationMemory {
    /// Create an empty memory using the best available token estimator.
    pub fn new(max_history: usize) -> Self {
        Self::with_estimator(max_history, default_estimator())
    }

    /// Create an empty memory with a specific token estimator.
    pub fn with_estimator(max_history: usize, estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            max_history,
            turns: Vec::new(),
            estimator,
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Change the cap, trimming immediately if needed.
    pub fn set_max_history(&mut self, max_history: usize) {
        self.max_history = max_history;
        self.trim();
    }

    /// Append a turn, then drop the oldest turns beyond `max_history`.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        let token_count = self.estimator.count(&content);
        self.turns.push(Turn {
            role,
            content,
            timestamp: now_secs(),
            token_count,
        });
        self.trim();
    }

    fn trim(&mut self) {
        if self.turns.len() > self.max_history {
            let overflow = self.turns.len() - self.max_history;
            self.turns.drain(..overflow);
            tracing::debug!("Trimmed {} old message(s) from conversation memory", overflow);
        }
    }

    /// The most recent `max_turns` turns, oldest first. Zero means all.
    pub fn get_history(&self, max_turns: usize) -> Vec<ContextMessage> {
        let start = if max_turns == 0 {
            0
        } else {
            self.turns.len().saturating_sub(max_turns)
        };
        self.turns[start..].iter().map(ContextMessage::from).collect()
    }

    /// Turns that fit in `max_tokens`, newest first priority, returned in
    /// chronological order.
    ///
    /// The most recent turn is always included, even when it alone exceeds
    /// the budget.
    pub fn get_context_window(&self, max_tokens: usize) -> Vec<ContextMessage> {
        let mut used = 0;
        let mut taken = 0;

        for turn in self.turns.iter().rev() {
            if used + turn.token_count > max_tokens && taken > 0 {
                break;
            }
            used += turn.token_count;
            taken += 1;
        }

        tracing::debug!(
            "Context window: {}/{} messages, ~{} tokens",
            taken,
            self.turns.len(),
            used
        );
        self.turns[self.turns.len() - taken..]
            .iter()
            .map(ContextMessage::from)
            .collect()
    }

    /// Collapse everything but the last [`KEEP_RECENT`] turns into one
    /// system turn holding a truncated digest. Returns the digest, or an
    /// empty string when there is nothing to collapse.
    pub fn summarize(&mut self) -> String {
        if self.turns.len() <= KEEP_RECENT {
            return String::new();
        }

        let split = self.turns.len() - KEEP_RECENT;
        let recent = self.turns.split_off(split);
        let older = std::mem::take(&mut self.turns);

        let mut lines = Vec::with_capacity(older.len() + 1);
        lines.push(format!("[Conversation summary: {} earlier messages]", older.len()));
        for turn in &older {
            lines.push(format!("  {}: {}", turn.role.label(), snippet(&turn.content)));
        }
        let summary = lines.join("\n");

        let token_count = self.estimator.count(&summary);
        self.turns.push(Turn {
            role: Role::System,
            content: summary.clone(),
            timestamp: now_secs(),
            token_count,
        });
        self.turns.extend(recent);

        tracing::info!(
            "Summarized {} messages into 1 summary + {} recent",
            older.len(),
            KEEP_RECENT
        );
        summary
    }

    /// Remove all turns.
    pub fn clear(&mut self) {
        self.turns.clear();
        tracing::info!("Conversation memory cleared");
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn message_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Sum of cached token counts.
    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.token_count).sum()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            message_count: self.message_count(),
            total_tokens: self.total_tokens(),
            max_history: self.max_history,
        }
    }

    /// Write the session to a JSON file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MemoryError::IoError(e.to_string()))?;
        }

        let file = SessionFileOut {
            version: SESSION_FORMAT_VERSION,
            saved_at: now_secs(),
            max_history: self.max_history,
            messages: &self.turns,
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| MemoryError::SerializeError(e.to_string()))?;
        fs::write(path, content).map_err(|e| MemoryError::IoError(e.to_string()))?;

        tracing::info!(
            "Session saved to {} ({} messages)",
            path.display(),
            self.turns.len()
        );
        Ok(())
    }

    /// Replace turns and `max_history` with the contents of a session file.
    ///
    /// Non-zero token counts are taken from the file as-is; missing or zero
    /// counts are re-estimated. The result is trimmed to `max_history`. On
    /// error the memory is left unchanged.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MemoryError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| MemoryError::IoError(e.to_string()))?;
        let file: SessionFileIn =
            serde_json::from_str(&content).map_err(|e| MemoryError::ParseError(e.to_string()))?;
        let mut turns = file
            .messages
            .ok_or_else(|| MemoryError::InvalidFormat(path.to_path_buf()))?;

        for turn in turns.iter_mut().filter(|t| t.token_count == 0) {
            turn.token_count = self.estimator.count(&turn.content);
        }

        self.turns = turns;
        if let Some(max_history) = file.max_history {
            self.max_history = max_history;
        }
        self.trim();

        tracing::info!(
            "Session loaded from {} ({} messages)",
            path.display(),
            self.turns.len()
        );
        Ok(())
    }
}

fn snippet(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let mut chars = flat.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
