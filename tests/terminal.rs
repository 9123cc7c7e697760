use std::sync::Arc;

use chat_provider_mock::ScriptedCompletionSource;
use chatbot_lite::context::{ContextSettings, ContextStrategy};
use chatbot_lite::runtime::ChatRuntime;
use chatbot_lite::terminal::{clipboard_sequence, Terminal};
use session_store::SessionStore;
use tempfile::TempDir;

fn runtime() -> (TempDir, ChatRuntime) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::open(dir.path().join("history")).expect("store");
    let settings = ContextSettings {
        max_tokens: 2000,
        compress_threshold: 0.85,
        compress_summary_tokens: 300,
        strategy: ContextStrategy::LazyCompress,
    };
    let source = Arc::new(ScriptedCompletionSource::new().with_model_id("mock-model"));
    let runtime = ChatRuntime::new(store, source, settings, "You are a helpful AI assistant.");
    runtime.new_session().expect("new session");
    (dir, runtime)
}

async fn run_script(runtime: &ChatRuntime, script: &str) -> String {
    let mut terminal = Terminal::new(runtime, Vec::new());
    terminal.run(script.as_bytes()).await.expect("terminal run");
    String::from_utf8(terminal.into_output()).expect("utf-8 output")
}

#[tokio::test]
async fn chat_and_commands_share_one_loop() {
    let (_dir, runtime) = runtime();
    let output = run_script(
        &runtime,
        "hello there\n/status\n/sessions\n/search hello\n/bogus\n/load\n/quit\nnever sent\n",
    )
    .await;

    assert!(output.starts_with("chatbot-lite "), "{output}");
    assert!(output.contains("(mock / mock-model)"), "{output}");
    assert!(output.contains("Mock reply to: hello there\n"), "{output}");
    assert!(output.contains("[title] Mock conversation"), "{output}");
    assert!(output.contains("messages:  2"), "{output}");
    assert!(output.contains("context:   full history"), "{output}");
    assert!(output.contains("Mock conversation  (2 messages"), "{output}");
    assert!(output.contains("      hello there"), "{output}");
    assert!(output.contains("unknown command /bogus; type /help"), "{output}");
    assert!(output.contains("usage: /load <id>"), "{output}");
    assert!(!output.contains("never sent"), "{output}");
}

#[tokio::test]
async fn failures_are_printed_inline() {
    let (_dir, runtime) = runtime();
    let output = run_script(
        &runtime,
        "/load 20200101_000000_000000_ffffff\n/delete ../escape\n/help\n",
    )
    .await;

    assert!(output.contains("[error] session '20200101_000000_000000_ffffff' not found"), "{output}");
    assert!(output.contains("[error] invalid session id '../escape'"), "{output}");
    assert!(output.contains("/search <text>"), "{output}");
}

#[tokio::test]
async fn load_prints_stored_history() {
    let (_dir, runtime) = runtime();
    run_script(&runtime, "first question\n").await;
    let session_id = runtime.active_session_id().expect("active session");
    runtime.new_session().expect("new session");

    let output = run_script(&runtime, &format!("/load {session_id}\n")).await;

    assert!(
        output.contains(&format!("Loaded session {session_id} (Mock conversation)")),
        "{output}"
    );
    assert!(output.contains("user: first question"), "{output}");
    assert!(output.contains("assistant: Mock reply to: first question"), "{output}");
    assert!(!output.contains("system:"), "{output}");
}

#[tokio::test]
async fn end_of_input_exits_cleanly() {
    let (_dir, runtime) = runtime();
    let output = run_script(&runtime, "").await;
    assert!(output.ends_with("> \n"), "{output}");
}

#[tokio::test]
async fn copy_sends_last_reply_to_clipboard() {
    let (_dir, runtime) = runtime();
    let output = run_script(&runtime, "/copy\nhello there\n/copy\n").await;

    assert!(output.contains("No reply to copy yet."), "{output}");
    let expected = clipboard_sequence("Mock reply to: hello there");
    assert!(output.contains(&expected), "{output}");
    assert!(output.contains("Copied last reply (26 chars)."), "{output}");
}
