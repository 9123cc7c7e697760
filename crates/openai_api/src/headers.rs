use std::collections::BTreeMap;

use crate::config::OpenAiApiConfig;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for chat completion requests.
///
/// The `authorization` header is omitted when the API key is blank; local
/// servers such as Ollama accept unauthenticated requests.
pub fn build_headers(config: &OpenAiApiConfig, stream: bool) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    let api_key = config.api_key.trim();
    if !api_key.is_empty() {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {api_key}"));
    }
    let accept = if stream {
        "text/event-stream"
    } else {
        "application/json"
    };
    headers.insert(HEADER_ACCEPT.to_owned(), accept.to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let ua = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers
}

pub fn default_user_agent() -> String {
    format!("chatbot-lite/{}", env!("CARGO_PKG_VERSION"))
}
