use chat_provider::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "New Chat";

/// One persisted message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub tokens: usize,
}

impl StoredMessage {
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// On-disk session document; `messages[0]` is always the system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub total_tokens: usize,
}

impl SessionRecord {
    /// Messages in model-facing form, system prompt first.
    #[must_use]
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(StoredMessage::to_chat_message)
            .collect()
    }

    #[must_use]
    pub fn has_user_messages(&self) -> bool {
        self.messages
            .iter()
            .any(|message| message.role == Role::User)
    }

    /// Message count excluding the system prompt.
    #[must_use]
    pub fn conversation_len(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }
}

/// Row returned by `SessionStore::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Title,
    Content,
}

/// Row returned by `SessionStore::search`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub session_id: String,
    pub title: String,
    pub updated_at: String,
    pub match_kind: MatchKind,
    /// Truncated matching message for `MatchKind::Content`.
    pub preview: Option<String>,
}
