//! Per-turn context window policy.
//!
//! Below the token threshold the whole conversation is sent. Above it, older
//! history is summarized once per session and the summary is reused for
//! every later turn until [`ContextManager::reset_compression`] is called.

use std::sync::{Arc, Mutex, MutexGuard};

use chat_provider::{ChatMessage, CompletionSource, CHARS_PER_TOKEN};
use serde::Deserialize;
use session_store::SessionRecord;

/// Number of trailing history messages always sent verbatim.
pub const RECENT_MESSAGE_COUNT: usize = 10;

pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]\n";
pub const COMPRESSION_FAILED_PREFIX: &str = "[Compression failed, showing truncated history]\n";

const SUMMARIZER_INSTRUCTIONS: &str = "You are a conversation summarizer.";

/// What to do with older history once the threshold is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Summarize older history once and keep the summary.
    #[default]
    LazyCompress,
    /// Drop older history without summarizing it.
    SlidingWindow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextSettings {
    pub max_tokens: u32,
    pub compress_threshold: f64,
    pub compress_summary_tokens: usize,
    pub strategy: ContextStrategy,
}

impl ContextSettings {
    /// Token count at which history handling kicks in.
    #[must_use]
    pub fn threshold(&self) -> usize {
        (f64::from(self.max_tokens) * self.compress_threshold).floor() as usize
    }
}

/// Read-only view of the compression cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStatus {
    pub has_compressed: bool,
    /// Length of the cached summary in characters.
    pub summary_length: usize,
    pub recent_message_count: usize,
    pub threshold: usize,
}

pub struct ContextManager {
    settings: ContextSettings,
    source: Arc<dyn CompletionSource>,
    compressed_summary: Mutex<Option<String>>,
    span: tracing::Span,
}

impl ContextManager {
    pub fn new(settings: ContextSettings, source: Arc<dyn CompletionSource>) -> Self {
        Self {
            settings,
            source,
            compressed_summary: Mutex::new(None),
            span: tracing::info_span!("context"),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Messages to send for the next turn.
    ///
    /// `pending_input_tokens` is added to the session total before comparing
    /// against the threshold; the comparison is strict, so reaching the
    /// threshold exactly already triggers history handling. A failed
    /// summarization never fails the turn: a truncated transcript is cached
    /// in its place.
    pub async fn get_context_messages(
        &self,
        session: &SessionRecord,
        pending_input_tokens: usize,
    ) -> Vec<ChatMessage> {
        let messages = session.chat_messages();
        let threshold = self.settings.threshold();
        let projected = session.total_tokens + pending_input_tokens;

        if projected < threshold {
            return messages;
        }

        let Some((system, history)) = messages.split_first() else {
            return messages;
        };
        if history.len() <= RECENT_MESSAGE_COUNT {
            return messages;
        }

        let (older, recent) = history.split_at(history.len() - RECENT_MESSAGE_COUNT);
        let mut context = Vec::with_capacity(RECENT_MESSAGE_COUNT + 2);
        context.push(system.clone());

        if self.settings.strategy == ContextStrategy::LazyCompress {
            let summary = self.summary_for(older, projected, threshold).await;
            if !summary.is_empty() {
                context.push(ChatMessage::system(format!("{SUMMARY_PREFIX}{summary}")));
            }
        } else {
            tracing::debug!(
                parent: &self.span,
                dropped = older.len(),
                "sliding window dropped older history"
            );
        }

        context.extend_from_slice(recent);
        context
    }

    /// Forgets the cached summary; required whenever the active session changes.
    pub fn reset_compression(&self) {
        if lock_unpoisoned(&self.compressed_summary).take().is_some() {
            tracing::debug!(parent: &self.span, "compression cache cleared");
        }
    }

    #[must_use]
    pub fn compression_status(&self) -> CompressionStatus {
        let summary = lock_unpoisoned(&self.compressed_summary);
        CompressionStatus {
            has_compressed: summary.is_some(),
            summary_length: summary.as_deref().map_or(0, |text| text.chars().count()),
            recent_message_count: RECENT_MESSAGE_COUNT,
            threshold: self.settings.threshold(),
        }
    }

    async fn summary_for(&self, older: &[ChatMessage], projected: usize, threshold: usize) -> String {
        if let Some(summary) = lock_unpoisoned(&self.compressed_summary).as_ref() {
            return summary.clone();
        }

        tracing::info!(
            parent: &self.span,
            projected,
            threshold,
            older = older.len(),
            "compressing conversation history"
        );
        let summary = self.summarize(older).await;
        *lock_unpoisoned(&self.compressed_summary) = Some(summary.clone());
        summary
    }

    async fn summarize(&self, older: &[ChatMessage]) -> String {
        let transcript = transcript(older);
        let budget = self.settings.compress_summary_tokens;
        let request = [
            ChatMessage::system(SUMMARIZER_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Please summarize the following conversation into {budget} tokens or less.\n\
                 Focus on key information, decisions, and context that would be useful for continuing the conversation.\n\n\
                 Conversation:\n{transcript}\n\nSummary:"
            )),
        ];

        match self.source.completion(&request).await {
            Ok(summary) => summary.trim().to_string(),
            Err(error) => {
                tracing::warn!(parent: &self.span, %error, "summarization failed; caching truncated history");
                let truncated: String = transcript.chars().take(budget * CHARS_PER_TOKEN).collect();
                format!("{COMPRESSION_FAILED_PREFIX}{truncated}")
            }
        }
    }
}

/// `role: content` lines separated by blank lines.
fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role, message.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
