use std::fs;
use std::thread;
use std::time::Duration;

use chat_provider::{ChatMessage, Role};
use pretty_assertions::assert_eq;
use session_store::{
    session_file_name, MatchKind, SessionStore, SessionStoreError, DEFAULT_TITLE,
};
use tempfile::TempDir;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

fn open_store() -> (TempDir, SessionStore) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = SessionStore::open(dir.path().join("history")).expect("store should open");
    (dir, store)
}

// RFC3339 timestamps carry sub-second precision, but keep orderings unambiguous.
fn tick() {
    thread::sleep(Duration::from_millis(5));
}

#[test]
fn open_creates_missing_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("a").join("b");
    let store = SessionStore::open(&root).expect("store");
    assert!(root.is_dir());
    assert_eq!(store.root(), root.as_path());
}

#[test]
fn create_writes_system_prompt_and_defaults() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");

    assert!(store.root().join(session_file_name(&id)).is_file());
    let record = store.load(&id).expect("load");
    assert_eq!(record.session_id, id);
    assert_eq!(record.title, DEFAULT_TITLE);
    assert_eq!(record.messages.len(), 1);
    assert_eq!(record.messages[0].role, Role::System);
    assert_eq!(record.messages[0].content, SYSTEM_PROMPT);
    assert_eq!(record.total_tokens, SYSTEM_PROMPT.chars().count() / 4);
    assert_eq!(record.created_at, record.updated_at);
}

#[test]
fn append_keeps_total_tokens_equal_to_message_sum() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");

    let user = store
        .append(&id, Role::User, "How do I read a file in Rust?")
        .expect("append user");
    assert_eq!(user.tokens, 7);
    store
        .append(&id, Role::Assistant, "Use std::fs::read_to_string.")
        .expect("append assistant");
    store.append(&id, Role::Assistant, "").expect("append empty");

    let record = store.load(&id).expect("load");
    let sum: usize = record.messages.iter().map(|message| message.tokens).sum();
    assert_eq!(record.total_tokens, sum);
    assert_eq!(record.messages.len(), 4);
    assert_eq!(record.messages[3].tokens, 0);
    assert_eq!(
        record.chat_messages()[1],
        ChatMessage::user("How do I read a file in Rust?")
    );
}

#[test]
fn append_bumps_updated_at() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    let before = store.load(&id).expect("load").updated_at;
    tick();
    store.append(&id, Role::User, "hi").expect("append");
    let record = store.load(&id).expect("load");
    assert_ne!(record.updated_at, before);
    assert_eq!(record.created_at, before);
}

#[test]
fn records_keep_non_ascii_text_readable() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    store.append(&id, Role::User, "你好，世界").expect("append");

    let raw = fs::read_to_string(store.path_for(&id).expect("path")).expect("read raw");
    assert!(raw.contains("你好，世界"));
    assert!(raw.contains('\n'), "documents are pretty-printed");
}

#[test]
fn load_missing_session_is_not_found() {
    let (_dir, store) = open_store();
    let error = store.load("20260101_000000_000000_abcdef").expect_err("missing");
    assert!(matches!(error, SessionStoreError::NotFound { .. }));
}

#[test]
fn load_rejects_ids_that_escape_the_root() {
    let (_dir, store) = open_store();
    let error = store.load("../secrets").expect_err("invalid id");
    assert!(matches!(error, SessionStoreError::InvalidSessionId { .. }));
}

#[test]
fn load_corrupt_file_reports_path() {
    let (_dir, store) = open_store();
    let path = store.root().join(session_file_name("broken"));
    fs::write(&path, "{ not json").expect("write corrupt file");

    match store.load("broken").expect_err("corrupt") {
        SessionStoreError::Json { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn update_title_and_is_empty() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    assert!(store.is_empty(&id).expect("is_empty"));

    store.append(&id, Role::User, "first question").expect("append");
    assert!(!store.is_empty(&id).expect("is_empty"));

    store.update_title(&id, "File IO").expect("update title");
    assert_eq!(store.load(&id).expect("load").title, "File IO");
}

#[test]
fn delete_removes_file_and_reports_missing() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    store.delete(&id).expect("delete");
    assert!(matches!(
        store.load(&id),
        Err(SessionStoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete(&id),
        Err(SessionStoreError::NotFound { .. })
    ));
}

#[test]
fn list_orders_newest_first_and_counts_without_system_prompt() {
    let (_dir, store) = open_store();
    let older = store.create(SYSTEM_PROMPT).expect("create older");
    tick();
    let newer = store.create(SYSTEM_PROMPT).expect("create newer");
    tick();
    store.append(&older, Role::User, "bump").expect("append");
    store.append(&older, Role::Assistant, "ok").expect("append");

    let listed = store.list(None).expect("list");
    let ids: Vec<&str> = listed.iter().map(|row| row.session_id.as_str()).collect();
    assert_eq!(ids, vec![older.as_str(), newer.as_str()]);
    assert_eq!(listed[0].message_count, 2);
    assert_eq!(listed[1].message_count, 0);

    let limited = store.list(Some(1)).expect("list limited");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].session_id, older);
}

#[test]
fn list_and_search_skip_corrupt_and_foreign_files() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    store.append(&id, Role::User, "tokio runtime question").expect("append");

    fs::write(store.root().join(session_file_name("corrupt")), "[]").expect("corrupt");
    fs::write(store.root().join("notes.txt"), "tokio").expect("foreign");
    fs::write(store.root().join("session_x.json.tmp"), "tokio").expect("temp");

    let listed = store.list(None).expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, id);

    let hits = store.search("TOKIO").expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].session_id, id);
}

#[test]
fn search_prefers_title_over_content() {
    let (_dir, store) = open_store();
    let titled = store.create(SYSTEM_PROMPT).expect("create");
    store.append(&titled, Role::User, "borrow checker help").expect("append");
    store.update_title(&titled, "Borrow checker").expect("title");

    let content_only = store.create(SYSTEM_PROMPT).expect("create");
    store
        .append(&content_only, Role::User, "nothing relevant")
        .expect("append");
    store
        .append(&content_only, Role::Assistant, "The BORROW rules are simple.")
        .expect("append");

    let mut hits = store.search("borrow").expect("search");
    hits.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    let titled_hit = hits
        .iter()
        .find(|hit| hit.session_id == titled)
        .expect("title hit");
    assert_eq!(titled_hit.match_kind, MatchKind::Title);
    assert_eq!(titled_hit.preview, None);

    let content_hit = hits
        .iter()
        .find(|hit| hit.session_id == content_only)
        .expect("content hit");
    assert_eq!(content_hit.match_kind, MatchKind::Content);
    assert_eq!(
        content_hit.preview.as_deref(),
        Some("The BORROW rules are simple.")
    );
}

#[test]
fn search_truncates_long_previews_and_ignores_system_prompt() {
    let (_dir, store) = open_store();
    let id = store.create(SYSTEM_PROMPT).expect("create");
    let long = format!("needle {}", "x".repeat(300));
    store.append(&id, Role::User, &long).expect("append");

    let hits = store.search("needle").expect("search");
    let preview = hits[0].preview.as_deref().expect("preview");
    assert_eq!(preview.chars().count(), 100);
    assert!(preview.ends_with("..."));

    assert!(store.search("helpful").expect("search").is_empty());
    assert!(store.search("   ").expect("search").is_empty());
}
