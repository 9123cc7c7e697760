//! Deterministic mock implementation of the shared `chat_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! offline runs and contract-level integration testing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chat_provider::{
    strip_think_tags, ChatMessage, CompletionError, CompletionSource, FragmentAssembler,
    ProviderProfile, Role,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const DEFAULT_COMPLETION: &str = "Mock conversation";

/// Scripted outcome of one `stream_completion` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamScript {
    /// Raw deltas delivered in order, then a clean finish.
    Chunks(Vec<String>),
    /// Raw deltas delivered in order, then a failure.
    FailAfter {
        chunks: Vec<String>,
        error: CompletionError,
    },
}

impl StreamScript {
    #[must_use]
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Chunks(chunks.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn error(error: CompletionError) -> Self {
        Self::FailAfter {
            chunks: Vec::new(),
            error,
        }
    }
}

/// Which trait method received a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Stream,
    Completion,
}

/// Messages received by the source, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub kind: RequestKind,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
struct ScriptState {
    streams: VecDeque<StreamScript>,
    completions: VecDeque<Result<String, CompletionError>>,
    requests: Vec<RecordedRequest>,
}

/// Deterministic completion source used by tests and `provider: mock` runs.
///
/// Scripted streams and completion replies are consumed in order. Once a queue
/// is empty, streams echo the last user message behind a think span and
/// completions return a fixed reply.
#[derive(Debug)]
pub struct ScriptedCompletionSource {
    model_id: String,
    fragment_delay: Option<Duration>,
    default_completion: String,
    state: Mutex<ScriptState>,
}

impl Default for ScriptedCompletionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCompletionSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_id: "mock".to_string(),
            fragment_delay: None,
            default_completion: DEFAULT_COMPLETION.to_string(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Sleeps between deltas to imitate a live model.
    #[must_use]
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_default_completion(mut self, reply: impl Into<String>) -> Self {
        self.default_completion = reply.into();
        self
    }

    /// Queues the outcome of a future `stream_completion` call.
    pub fn push_stream(&self, script: StreamScript) {
        lock_unpoisoned(&self.state).streams.push_back(script);
    }

    /// Queues the outcome of a future `completion` call.
    pub fn push_completion(&self, reply: Result<String, CompletionError>) {
        lock_unpoisoned(&self.state).completions.push_back(reply);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    #[must_use]
    pub fn stream_calls(&self) -> usize {
        self.count(RequestKind::Stream)
    }

    #[must_use]
    pub fn completion_calls(&self) -> usize {
        self.count(RequestKind::Completion)
    }

    fn count(&self, kind: RequestKind) -> usize {
        lock_unpoisoned(&self.state)
            .requests
            .iter()
            .filter(|request| request.kind == kind)
            .count()
    }

    fn record(&self, kind: RequestKind, messages: &[ChatMessage]) {
        lock_unpoisoned(&self.state).requests.push(RecordedRequest {
            kind,
            messages: messages.to_vec(),
        });
    }

    fn next_stream(&self, messages: &[ChatMessage]) -> StreamScript {
        lock_unpoisoned(&self.state)
            .streams
            .pop_front()
            .unwrap_or_else(|| echo_script(messages))
    }
}

#[async_trait]
impl CompletionSource for ScriptedCompletionSource {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError> {
        self.record(RequestKind::Stream, messages);
        let (chunks, failure) = match self.next_stream(messages) {
            StreamScript::Chunks(chunks) => (chunks, None),
            StreamScript::FailAfter { chunks, error } => (chunks, Some(error)),
        };

        let mut assembler = FragmentAssembler::new();
        for chunk in chunks {
            if is_cancelled() {
                tracing::debug!("mock stream cancelled");
                return Ok(assembler.into_text());
            }
            if let Some(fragment) = assembler.push(&chunk) {
                on_fragment(&fragment);
            }
            match self.fragment_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        if let Some(fragment) = assembler.finish() {
            on_fragment(&fragment);
        }
        Ok(assembler.into_text())
    }

    async fn completion(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.record(RequestKind::Completion, messages);
        let reply = lock_unpoisoned(&self.state).completions.pop_front();
        let reply = reply.unwrap_or_else(|| Ok(self.default_completion.clone()))?;
        Ok(strip_think_tags(&reply).trim().to_string())
    }
}

fn echo_script(messages: &[ChatMessage]) -> StreamScript {
    let last_user = messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map_or("", |message| message.content.as_str());

    let mut chunks = vec![
        "<think>".to_string(),
        "drafting a reply".to_string(),
        "</think>\n\n".to_string(),
        "Mock reply to: ".to_string(),
    ];
    chunks.extend(last_user.split_inclusive(' ').map(str::to_string));
    StreamScript::Chunks(chunks)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use chat_provider::{ChatMessage, CompletionError, CompletionSource};

    use super::{RequestKind, ScriptedCompletionSource, StreamScript};

    async fn collect(source: &ScriptedCompletionSource) -> (Result<String, CompletionError>, Vec<String>) {
        let mut fragments = Vec::new();
        let result = source
            .stream_completion(&[ChatMessage::user("ping me")], &|| false, &mut |fragment: &str| {
                fragments.push(fragment.to_string())
            })
            .await;
        (result, fragments)
    }

    #[tokio::test]
    async fn scripted_chunks_are_filtered_and_concatenated() {
        let source = ScriptedCompletionSource::new();
        source.push_stream(StreamScript::chunks(["  <think>x</think>", "Hi", " there"]));

        let (result, fragments) = collect(&source).await;
        assert_eq!(result.expect("stream"), "Hi there");
        assert_eq!(fragments.concat(), "Hi there");
        assert_eq!(source.stream_calls(), 1);
    }

    #[tokio::test]
    async fn default_stream_echoes_last_user_message() {
        let source = ScriptedCompletionSource::new();
        let (result, _) = collect(&source).await;
        assert_eq!(result.expect("stream"), "Mock reply to: ping me");
    }

    #[tokio::test]
    async fn fail_after_reports_error() {
        let source = ScriptedCompletionSource::new();
        source.push_stream(StreamScript::FailAfter {
            chunks: vec!["partial output".to_string()],
            error: CompletionError::Transport("connection reset".to_string()),
        });

        let (result, _) = collect(&source).await;
        assert_eq!(
            result.expect_err("scripted failure"),
            CompletionError::Transport("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn completion_queue_then_default() {
        let source = ScriptedCompletionSource::new().with_default_completion("fallback");
        source.push_completion(Ok(" <think>a</think> first ".to_string()));

        let messages = [ChatMessage::user("q")];
        assert_eq!(source.completion(&messages).await.expect("first"), "first");
        assert_eq!(source.completion(&messages).await.expect("second"), "fallback");
        assert_eq!(source.completion_calls(), 2);
        assert_eq!(source.requests()[0].kind, RequestKind::Completion);
    }

    #[tokio::test]
    async fn cancelled_stream_returns_nothing_when_cancelled_up_front() {
        let source = ScriptedCompletionSource::new();
        source.push_stream(StreamScript::chunks(["a", "b"]));
        let mut count = 0;
        let text = source
            .stream_completion(&[ChatMessage::user("x")], &|| true, &mut |_: &str| count += 1)
            .await
            .expect("stream");
        assert_eq!(text, "");
        assert_eq!(count, 0);
    }
}
