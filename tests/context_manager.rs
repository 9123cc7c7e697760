use std::sync::Arc;

use chat_provider::{ChatMessage, CompletionError, Role};
use chat_provider_mock::{RequestKind, ScriptedCompletionSource};
use chatbot_lite::context::{
    ContextManager, ContextSettings, ContextStrategy, COMPRESSION_FAILED_PREFIX,
    RECENT_MESSAGE_COUNT, SUMMARY_PREFIX,
};
use pretty_assertions::assert_eq;
use session_store::{SessionRecord, StoredMessage, DEFAULT_TITLE};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
const TIMESTAMP: &str = "2026-02-14T10:15:00Z";

fn settings(strategy: ContextStrategy) -> ContextSettings {
    ContextSettings {
        max_tokens: 2000,
        compress_threshold: 0.85,
        compress_summary_tokens: 300,
        strategy,
    }
}

fn stored(role: Role, content: String) -> StoredMessage {
    StoredMessage {
        role,
        content,
        timestamp: TIMESTAMP.to_string(),
        tokens: 0,
    }
}

/// System prompt plus `history` alternating user/assistant messages.
fn session(history: usize, total_tokens: usize) -> SessionRecord {
    let mut messages = vec![stored(Role::System, SYSTEM_PROMPT.to_string())];
    messages.extend((0..history).map(|index| {
        let role = if index % 2 == 0 {
            Role::User
        } else {
            Role::Assistant
        };
        stored(role, format!("message {index}"))
    }));

    SessionRecord {
        session_id: "20260214_101500_000000_abcdef".to_string(),
        created_at: TIMESTAMP.to_string(),
        updated_at: TIMESTAMP.to_string(),
        title: DEFAULT_TITLE.to_string(),
        messages,
        total_tokens,
    }
}

fn manager(
    strategy: ContextStrategy,
) -> (Arc<ScriptedCompletionSource>, ContextManager) {
    let source = Arc::new(ScriptedCompletionSource::new());
    let manager = ContextManager::new(settings(strategy), source.clone())
        .with_span(tracing::info_span!("context", test = "context_manager"));
    (source, manager)
}

#[tokio::test]
async fn below_threshold_returns_whole_history() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    let record = session(30, 1000);

    let context = manager.get_context_messages(&record, 200).await;

    assert_eq!(context, record.chat_messages());
    assert_eq!(source.completion_calls(), 0);
    assert!(!manager.compression_status().has_compressed);
}

#[tokio::test]
async fn reaching_threshold_exactly_triggers_compression() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    source.push_completion(Ok("summary".to_string()));

    let context = manager.get_context_messages(&session(30, 1500), 200).await;

    assert_eq!(context.len(), RECENT_MESSAGE_COUNT + 2);
    assert_eq!(source.completion_calls(), 1);
}

#[tokio::test]
async fn over_threshold_summarizes_older_history_once() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    source.push_completion(Ok("  The user asked about Rust.  ".to_string()));
    let record = session(30, 1550);

    let context = manager.get_context_messages(&record, 200).await;

    assert_eq!(context.len(), 12);
    assert_eq!(source.completion_calls(), 1);
    assert_eq!(context[0], ChatMessage::system(SYSTEM_PROMPT));
    assert_eq!(
        context[1],
        ChatMessage::system(format!("{SUMMARY_PREFIX}The user asked about Rust."))
    );
    assert_eq!(&context[2..], &record.chat_messages()[21..]);

    let request = &source.requests()[0];
    assert_eq!(request.kind, RequestKind::Completion);
    assert!(request.messages[1].content.contains("user: message 0"));
    assert!(request.messages[1].content.contains("assistant: message 19"));
    assert!(!request.messages[1].content.contains("message 20"));

    let status = manager.compression_status();
    assert!(status.has_compressed);
    assert_eq!(status.summary_length, "The user asked about Rust.".len());
    assert_eq!(status.recent_message_count, RECENT_MESSAGE_COUNT);
    assert_eq!(status.threshold, 1700);
}

#[tokio::test]
async fn short_history_is_never_compressed() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    let record = session(8, 1550);

    let context = manager.get_context_messages(&record, 200).await;

    assert_eq!(context, record.chat_messages());
    assert_eq!(source.completion_calls(), 0);
}

#[tokio::test]
async fn summary_is_cached_until_reset() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    source.push_completion(Ok("first summary".to_string()));
    source.push_completion(Ok("second summary".to_string()));

    let first = manager.get_context_messages(&session(30, 1800), 0).await;
    let second = manager.get_context_messages(&session(32, 1900), 0).await;
    assert_eq!(source.completion_calls(), 1);
    assert_eq!(first[1].content, format!("{SUMMARY_PREFIX}first summary"));
    assert_eq!(second[1].content, format!("{SUMMARY_PREFIX}first summary"));
    assert_eq!(second.len(), 12);

    manager.reset_compression();
    assert!(!manager.compression_status().has_compressed);

    let third = manager.get_context_messages(&session(30, 1800), 0).await;
    assert_eq!(source.completion_calls(), 2);
    assert_eq!(third[1].content, format!("{SUMMARY_PREFIX}second summary"));
}

#[tokio::test]
async fn failed_summary_caches_truncated_transcript() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    source.push_completion(Err(CompletionError::Transport("offline".to_string())));

    let context = manager.get_context_messages(&session(30, 1800), 0).await;

    assert_eq!(context.len(), 12);
    let summary = context[1]
        .content
        .strip_prefix(SUMMARY_PREFIX)
        .expect("summary prefix");
    let transcript = summary
        .strip_prefix(COMPRESSION_FAILED_PREFIX)
        .expect("failure marker");
    assert!(transcript.starts_with("user: message 0\n\nassistant: message 1"));
    assert!(transcript.chars().count() <= 300 * 4);

    manager.get_context_messages(&session(30, 1800), 0).await;
    assert_eq!(source.completion_calls(), 1, "fallback is cached too");
}

#[tokio::test]
async fn failed_summary_cuts_long_transcript_to_budget() {
    let source = Arc::new(ScriptedCompletionSource::new());
    let manager = ContextManager::new(
        ContextSettings {
            compress_summary_tokens: 10,
            ..settings(ContextStrategy::LazyCompress)
        },
        source.clone(),
    );
    source.push_completion(Err(CompletionError::Transport("offline".to_string())));
    let mut record = session(30, 1800);
    for message in record.messages.iter_mut().skip(1) {
        message.content = "x".repeat(100);
    }

    let context = manager.get_context_messages(&record, 0).await;

    let transcript = context[1]
        .content
        .strip_prefix(SUMMARY_PREFIX)
        .and_then(|summary| summary.strip_prefix(COMPRESSION_FAILED_PREFIX))
        .expect("fallback summary");
    assert_eq!(transcript.chars().count(), 10 * 4);
    assert_eq!(transcript, format!("user: {}", "x".repeat(34)));
}

#[tokio::test]
async fn empty_summary_is_not_inserted() {
    let (source, manager) = manager(ContextStrategy::LazyCompress);
    source.push_completion(Ok("   ".to_string()));

    let context = manager.get_context_messages(&session(30, 1800), 0).await;

    assert_eq!(context.len(), RECENT_MESSAGE_COUNT + 1);
    assert_eq!(context[0].role, Role::System);
    assert_eq!(context[1].content, "message 20");
}

#[tokio::test]
async fn sliding_window_drops_older_history_without_summarizing() {
    let (source, manager) = manager(ContextStrategy::SlidingWindow);
    let record = session(30, 1800);

    let context = manager.get_context_messages(&record, 0).await;

    assert_eq!(context.len(), RECENT_MESSAGE_COUNT + 1);
    assert_eq!(context[0], ChatMessage::system(SYSTEM_PROMPT));
    assert_eq!(&context[1..], &record.chat_messages()[21..]);
    assert_eq!(source.completion_calls(), 0);
    assert!(!manager.compression_status().has_compressed);
}
