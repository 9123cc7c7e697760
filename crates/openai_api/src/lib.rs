//! Transport-only client primitives for OpenAI-compatible chat completions.
//!
//! This crate owns request building, response parsing and SSE decoding for the
//! `/chat/completions` endpoint only. It has no knowledge of conversations,
//! think-span filtering or UI concerns; those live in the provider adapter.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{ChatCompletionStream, OpenAiApiClient};
pub use config::OpenAiApiConfig;
pub use error::OpenAiApiError;
pub use events::{ChatCompletionResponse, ChatStreamEvent, FinishReason};
pub use payload::{ChatCompletionRequest, RequestMessage};
pub use sse::SseStreamParser;
pub use url::normalize_chat_completions_url;
