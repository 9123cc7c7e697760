//! Terminal chat client for OpenAI-compatible chat-completion endpoints.
//!
//! # Crate layout
//! - [`config`]: YAML configuration with environment overrides and validation.
//! - [`context`]: per-turn context window policy with cached summarization.
//! - [`runtime`]: turn orchestration over the session store and a
//!   [`chat_provider::CompletionSource`].
//! - [`terminal`], [`commands`], [`signals`]: the line-oriented front-end.
//! - [`logging`]: file-backed `tracing` subscriber.
//!
//! Replies stream through a think-tag filter so `<think>...</think>` spans
//! never reach the screen or the stored history.

pub mod commands;
pub mod config;
pub mod context;
pub mod logging;
pub mod runtime;
pub mod signals;
pub mod terminal;

pub use crate::config::{Config, ConfigError, ProviderKind};
pub use crate::context::{CompressionStatus, ContextManager, ContextSettings, ContextStrategy};
pub use crate::runtime::{ChatRuntime, RuntimeStatus, TurnError, TurnOutcome};
