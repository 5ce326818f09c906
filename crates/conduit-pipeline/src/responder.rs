use async_trait::async_trait;
use conduit_core::types::{Message, PolicyDecision};
use conduit_memory::RecallHit;
use serde::{Deserialize, Serialize};

/// One context entry surfaced to the responder — a trimmed view of an
/// `ArchiveRecord`: sender display name, text truncated to 1,000 chars, and
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub sender_display_name: Option<String>,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Reply-thread and ambient context windows assembled by `ReplyContextEnrich`,
/// passed through to the responder alongside memory snippets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextWindows {
    /// Most-recent-first, only present when `event.reply_to` was set.
    pub reply_thread: Vec<ContextEntry>,
    /// Oldest-first, only populated for group chats.
    pub ambient: Vec<ContextEntry>,
}

/// External collaborator that turns an accepted message into a reply. Implementations own whatever provider/model routing they need.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate_reply(
        &self,
        event: &Message,
        decision: &PolicyDecision,
        context_windows: &ContextWindows,
        memory_snippets: &[RecallHit],
    ) -> Result<Option<String>, String>;
}

/// A responder that never produces a reply — used where no LLM backend is
/// wired yet (tests, a bridge-only deployment).
pub struct NullResponder;

#[async_trait]
impl Responder for NullResponder {
    async fn generate_reply(
        &self,
        _event: &Message,
        _decision: &PolicyDecision,
        _context_windows: &ContextWindows,
        _memory_snippets: &[RecallHit],
    ) -> Result<Option<String>, String> {
        Ok(None)
    }
}
