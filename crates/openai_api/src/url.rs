/// Default base URL: a local Ollama server's OpenAI-compatible API.
pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalize a base URL to the chat completions endpoint.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_API_BASE`]
/// 2) keep `/chat/completions` unchanged
/// 3) append `/chat/completions` otherwise
pub fn normalize_chat_completions_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_API_BASE
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(CHAT_COMPLETIONS_PATH) {
        return trimmed.to_string();
    }
    format!("{trimmed}{CHAT_COMPLETIONS_PATH}")
}
