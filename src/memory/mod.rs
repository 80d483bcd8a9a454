//! Conversation memory: a bounded history of turns with token-aware
//! context windows and session persistence.

mod conversation;
mod tokens;

pub use conversation::{
    ContextMessage, ConversationMemory, MemoryError, MemoryStats, Role, Turn, DEFAULT_MAX_HISTORY,
    KEEP_RECENT, SESSION_FORMAT_VERSION, SNIPPET_CHARS,
};
#[cfg(feature = "tiktoken")]
pub use tokens::TiktokenEstimator;
pub use tokens::{default_estimator, CharEstimator, TokenEstimator, CHARS_PER_TOKEN};
