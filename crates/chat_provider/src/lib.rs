//! Minimal provider-agnostic contract for chat completion sources.
//!
//! This crate defines the chat message model shared by the session store, the
//! context manager and every completion backend, together with the streaming
//! helpers that make all backends emit identical fragments. It contains no
//! transport or protocol details.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod assembler;
pub mod text;
pub mod think_filter;
pub mod tokens;

pub use assembler::FragmentAssembler;
pub use text::truncate_display;
pub use think_filter::{strip_think_tags, ThinkTagFilter};
pub use tokens::{estimate_tokens, CHARS_PER_TOKEN};

/// Shared cancellation flag polled between streamed fragments.
pub type CancelSignal = Arc<AtomicBool>;

/// Maximum display width of a generated session title.
pub const TITLE_MAX_WIDTH: usize = 40;

const TITLE_INSTRUCTIONS: &str = "You are a title generator. Given the user's question, produce a concise topic title. Output only the title with no other text. The title must not exceed 40 columns (ASCII letters, digits and half-width symbols count as 1, CJK characters and full-width symbols count as 2).";

/// Speaker of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model-facing message as sent to a completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Failure of a completion call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("LLM API call failed: {0}")]
    Transport(String),

    #[error("LLM API call failed: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM API call failed: stream error: {0}")]
    Stream(String),

    #[error("LLM API call failed: invalid response: {0}")]
    InvalidResponse(String),

    #[error("completion source is misconfigured: {0}")]
    Configuration(String),
}

/// Immutable metadata describing a completion source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Sends chat messages to a model and returns its reply.
#[async_trait]
pub trait CompletionSource: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Streams a reply, forwarding each non-empty filtered fragment in order.
    ///
    /// `is_cancelled` is consulted before every fragment is forwarded. Once it
    /// returns true no further fragments are delivered and the text produced so
    /// far is returned as a successful result.
    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError>;

    /// Requests a complete reply in one shot, with think spans removed and
    /// surrounding whitespace trimmed.
    async fn completion(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    /// Produces a short topic title for a conversation.
    ///
    /// Best-effort: any failure falls back to the truncated user message.
    async fn generate_title(&self, first_user_message: &str) -> String {
        let request = [
            ChatMessage::system(TITLE_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Generate a title for the conversation this question is likely to start:\n\n{first_user_message}"
            )),
        ];

        match self.completion(&request).await {
            Ok(reply) => {
                let title = clean_title(&reply);
                if title.is_empty() {
                    fallback_title(first_user_message)
                } else {
                    title
                }
            }
            Err(error) => {
                tracing::warn!(%error, "title generation failed; using message prefix");
                fallback_title(first_user_message)
            }
        }
    }
}

fn clean_title(reply: &str) -> String {
    let title = reply
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    truncate_display(title, TITLE_MAX_WIDTH, "")
}

/// Title derived from the user's message when generation is unavailable.
#[must_use]
pub fn fallback_title(first_user_message: &str) -> String {
    truncate_display(first_user_message.trim(), TITLE_MAX_WIDTH, "")
}
