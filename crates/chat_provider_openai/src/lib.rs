//! OpenAI-compatible implementation of the shared `chat_provider` contract.
//!
//! This adapter translates `openai_api` stream events into filtered display
//! fragments and maps transport failures onto `CompletionError`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chat_provider::{
    estimate_tokens, strip_think_tags, ChatMessage, CompletionError, CompletionSource,
    FragmentAssembler, ProviderProfile,
};
use openai_api::{
    ChatCompletionRequest, ChatStreamEvent, OpenAiApiClient, OpenAiApiConfig, OpenAiApiError,
    RequestMessage,
};
use tracing::Instrument;

/// Stable provider identifier used by startup selection.
pub const OPENAI_PROVIDER_ID: &str = "openai";

/// Runtime configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiProviderConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Route requests through `HTTP_PROXY`-style environment variables.
    pub use_env_proxy: bool,
}

impl OpenAiProviderConfig {
    #[must_use]
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: String::new(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: None,
            max_retries: None,
            use_env_proxy: false,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_env_proxy(mut self, enabled: bool) -> Self {
        self.use_env_proxy = enabled;
        self
    }

    fn to_api_config(&self) -> OpenAiApiConfig {
        let mut config = OpenAiApiConfig::new(self.api_key.clone())
            .with_base_url(&self.api_base)
            .with_env_proxy(self.use_env_proxy);

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }

        config
    }
}

/// `CompletionSource` backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct OpenAiCompletionSource {
    client: OpenAiApiClient,
    model: String,
    temperature: f64,
    max_tokens: u32,
    span: tracing::Span,
}

impl OpenAiCompletionSource {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, CompletionError> {
        if config.model.trim().is_empty() {
            return Err(CompletionError::Configuration(
                "model must not be empty".to_string(),
            ));
        }

        let client = OpenAiApiClient::new(config.to_api_config()).map_err(map_api_error)?;
        let span = tracing::info_span!(
            "completion",
            provider = OPENAI_PROVIDER_ID,
            model = %config.model
        );

        Ok(Self {
            client,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            span,
        })
    }

    /// Replaces the span that instruments every request from this source.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn endpoint(&self) -> String {
        self.client.normalized_endpoint()
    }

    fn build_request(&self, messages: &[ChatMessage]) -> ChatCompletionRequest {
        let messages = messages
            .iter()
            .map(|message| RequestMessage::new(message.role.as_str(), message.content.as_str()))
            .collect();

        ChatCompletionRequest::new(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    async fn run_stream(
        &self,
        messages: &[ChatMessage],
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError> {
        let request = self.build_request(messages);
        let input_tokens = input_tokens(messages);
        tracing::debug!(messages = messages.len(), input_tokens, "opening completion stream");

        let started = Instant::now();
        let mut stream = self
            .client
            .open_stream(&request)
            .await
            .map_err(map_api_error)?;
        let mut assembler = FragmentAssembler::new();

        loop {
            if is_cancelled() {
                log_cancelled(assembler.text(), started);
                return Ok(assembler.into_text());
            }

            let Some(event) = stream.next_event().await.map_err(map_api_error)? else {
                break;
            };

            if let ChatStreamEvent::ContentDelta { delta } = event {
                if is_cancelled() {
                    log_cancelled(assembler.text(), started);
                    return Ok(assembler.into_text());
                }
                if let Some(fragment) = assembler.push(&delta) {
                    on_fragment(&fragment);
                }
                tokio::task::yield_now().await;
            }
        }

        if let Some(fragment) = assembler.finish() {
            on_fragment(&fragment);
        }

        let text = assembler.into_text();
        tracing::info!(
            chars = text.chars().count(),
            input_tokens,
            output_tokens = estimate_tokens(&text),
            elapsed_ms = elapsed_ms(started),
            "completion stream finished"
        );
        Ok(text)
    }

    async fn run_completion(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let request = self.build_request(messages);
        let started = Instant::now();
        let raw = self
            .client
            .complete_text(&request)
            .await
            .map_err(map_api_error)?;
        let text = strip_think_tags(&raw).trim().to_string();
        tracing::debug!(
            input_tokens = input_tokens(messages),
            output_tokens = estimate_tokens(&text),
            elapsed_ms = elapsed_ms(started),
            "completion finished"
        );
        Ok(text)
    }
}

/// Estimated prompt size, summed per message like the session store does.
fn input_tokens(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn log_cancelled(text: &str, started: Instant) {
    tracing::info!(
        chars = text.chars().count(),
        output_tokens = estimate_tokens(text),
        elapsed_ms = elapsed_ms(started),
        "completion cancelled"
    );
}

#[async_trait]
impl CompletionSource for OpenAiCompletionSource {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: OPENAI_PROVIDER_ID.to_string(),
            model_id: self.model.clone(),
        }
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError> {
        self.run_stream(messages, is_cancelled, on_fragment)
            .instrument(self.span.clone())
            .await
            .inspect_err(|error| tracing::error!(parent: &self.span, %error, "completion stream failed"))
    }

    async fn completion(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.run_completion(messages)
            .instrument(self.span.clone())
            .await
            .inspect_err(|error| tracing::error!(parent: &self.span, %error, "completion failed"))
    }
}

/// Maps transport failures onto the provider-neutral error.
pub fn map_api_error(error: OpenAiApiError) -> CompletionError {
    match error {
        OpenAiApiError::Status(status, message) => CompletionError::Api {
            status: status.as_u16(),
            message,
        },
        OpenAiApiError::RetryExhausted {
            status: Some(status),
            last_error,
        } => CompletionError::Api {
            status: status.as_u16(),
            message: last_error.unwrap_or_else(|| "request failed".to_string()),
        },
        OpenAiApiError::RetryExhausted {
            status: None,
            last_error,
        } => CompletionError::Transport(last_error.unwrap_or_else(|| "request failed".to_string())),
        OpenAiApiError::Request(error) => CompletionError::Transport(error.to_string()),
        OpenAiApiError::StreamFailed { .. } => CompletionError::Stream(error.to_string()),
        OpenAiApiError::Serde(_) | OpenAiApiError::EmptyResponse => {
            CompletionError::InvalidResponse(error.to_string())
        }
        OpenAiApiError::MissingModel
        | OpenAiApiError::EmptyMessages
        | OpenAiApiError::InvalidHeader(_) => CompletionError::Configuration(error.to_string()),
    }
}
