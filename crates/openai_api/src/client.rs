use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};

use crate::config::OpenAiApiConfig;
use crate::error::{parse_error_message, OpenAiApiError};
use crate::events::{ChatCompletionResponse, ChatStreamEvent};
use crate::headers::build_headers;
use crate::payload::ChatCompletionRequest;
use crate::retry::{is_retryable_http_error, retry_delay};
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_completions_url;

#[derive(Debug)]
pub struct OpenAiApiClient {
    http: Client,
    config: OpenAiApiConfig,
}

impl OpenAiApiClient {
    pub fn new(config: OpenAiApiConfig) -> Result<Self, OpenAiApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(OpenAiApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_completions_url(&self.config.base_url)
    }

    pub fn build_headers(&self, stream: bool) -> Result<HeaderMap, OpenAiApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config, stream) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| OpenAiApiError::InvalidHeader(format!("invalid key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    OpenAiApiError::InvalidHeader(format!("invalid value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::RequestBuilder, OpenAiApiError> {
        validate_request(request)?;

        let headers = self.build_headers(request.stream)?;
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(request))
    }

    /// Send a request, retrying transient failures with exponential backoff.
    pub async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<Response, OpenAiApiError> {
        let max_retries = self.config.max_retries;
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.build_request(request)?.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = response.text().await.unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < max_retries && is_retryable_http_error(status.as_u16(), &body) {
                        tracing::debug!(attempt, status = status.as_u16(), "retrying chat completion request");
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay, attempt)).await;
                        continue;
                    }

                    return Err(OpenAiApiError::Status(status, message));
                }
                Err(error) => {
                    let retryable = error.is_connect() || error.is_timeout();
                    if attempt < max_retries && retryable {
                        tracing::debug!(attempt, %error, "retrying chat completion request");
                        last_error = Some(error.to_string());
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay, attempt)).await;
                        continue;
                    }
                    if attempt == 0 {
                        return Err(OpenAiApiError::Request(error));
                    }
                    return Err(OpenAiApiError::RetryExhausted {
                        status: last_status,
                        last_error: Some(error.to_string()),
                    });
                }
            }
        }

        Err(OpenAiApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Open a streaming completion; events are pulled with
    /// [`ChatCompletionStream::next_event`].
    pub async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionStream, OpenAiApiError> {
        let request = request.clone().with_stream(true);
        let response = self.send_with_retry(&request).await?;
        Ok(ChatCompletionStream::new(response.bytes_stream().boxed()))
    }

    /// Request a non-streaming completion and decode the response body.
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiApiError> {
        let request = request.clone().with_stream(false);
        let response = self.send_with_retry(&request).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Content of the first choice of a non-streaming completion.
    pub async fn complete_text(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<String, OpenAiApiError> {
        let response = self.complete(request).await?;
        if response.choices.is_empty() {
            return Err(OpenAiApiError::EmptyResponse);
        }
        Ok(response.first_content().unwrap_or_default().to_owned())
    }
}

/// Pull-based view over a streaming response body.
pub struct ChatCompletionStream {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: SseStreamParser,
    pending: VecDeque<ChatStreamEvent>,
    finished: bool,
}

impl ChatCompletionStream {
    pub fn new(bytes: BoxStream<'static, reqwest::Result<Bytes>>) -> Self {
        Self {
            bytes,
            parser: SseStreamParser::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next normalized event, or `None` once `[DONE]` arrives or the body ends.
    ///
    /// An `error` frame ends the stream with [`OpenAiApiError::StreamFailed`].
    pub async fn next_event(&mut self) -> Result<Option<ChatStreamEvent>, OpenAiApiError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if let Some(error) = stream_failure_from_event(&event) {
                    self.close();
                    return Err(error);
                }
                if matches!(event, ChatStreamEvent::Done) {
                    self.close();
                    return Ok(None);
                }
                return Ok(Some(event));
            }

            if self.finished {
                return Ok(None);
            }

            match self.bytes.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|error| {
                        self.finished = true;
                        OpenAiApiError::from(error)
                    })?;
                    self.pending.extend(self.parser.feed(&chunk));
                }
                None => {
                    self.pending.extend(self.parser.finish());
                    self.finished = true;
                }
            }
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.finished = true;
    }
}

impl std::fmt::Debug for ChatCompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionStream")
            .field("pending", &self.pending)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

fn validate_request(request: &ChatCompletionRequest) -> Result<(), OpenAiApiError> {
    if request.model.trim().is_empty() {
        return Err(OpenAiApiError::MissingModel);
    }
    if request.messages.is_empty() {
        return Err(OpenAiApiError::EmptyMessages);
    }
    Ok(())
}

fn stream_failure_from_event(event: &ChatStreamEvent) -> Option<OpenAiApiError> {
    match event {
        ChatStreamEvent::Error { code, message } => Some(OpenAiApiError::StreamFailed {
            code: code.clone(),
            message: message
                .clone()
                .or_else(|| code.clone())
                .unwrap_or_else(|| "unknown error".to_owned()),
        }),
        _ => None,
    }
}
