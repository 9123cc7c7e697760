//! Turn orchestration over the session store, the completion source and
//! the context manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chat_provider::{
    estimate_tokens, CancelSignal, CompletionError, CompletionSource, ProviderProfile, Role,
};
use session_store::{SearchHit, SessionRecord, SessionStore, SessionStoreError, SessionSummary};
use thiserror::Error;

use crate::context::{CompressionStatus, ContextManager, ContextSettings};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a reply is still being generated")]
    Busy,

    #[error("message is empty")]
    EmptyInput,

    #[error("no active session")]
    NoActiveSession,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

/// Result of one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub session_id: String,
    /// Persisted assistant text; partial when the turn was cancelled.
    pub reply: String,
    pub cancelled: bool,
    /// Title applied by this turn, set on the first message of a session.
    pub title: Option<String>,
}

/// Snapshot for the `/status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub session_id: String,
    pub title: String,
    pub message_count: usize,
    pub total_tokens: usize,
    pub compression: CompressionStatus,
    pub provider: ProviderProfile,
    pub generating: bool,
}

pub struct ChatRuntime {
    store: SessionStore,
    source: Arc<dyn CompletionSource>,
    context: ContextManager,
    system_prompt: String,
    active_session: Mutex<Option<String>>,
    cancel: CancelSignal,
    generating: AtomicBool,
    span: tracing::Span,
}

impl ChatRuntime {
    pub fn new(
        store: SessionStore,
        source: Arc<dyn CompletionSource>,
        settings: ContextSettings,
        system_prompt: impl Into<String>,
    ) -> Self {
        let context = ContextManager::new(settings, Arc::clone(&source));
        Self {
            store,
            source,
            context,
            system_prompt: system_prompt.into(),
            active_session: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
            generating: AtomicBool::new(false),
            span: tracing::info_span!("runtime"),
        }
    }

    /// Replaces the runtime span; the context manager is re-parented under it.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.context = self
            .context
            .with_span(tracing::info_span!(parent: &span, "context"));
        self.span = span;
        self
    }

    /// Flag observed by the streaming loop; setting it stops the current reply.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_session_id(&self) -> Option<String> {
        lock_unpoisoned(&self.active_session).clone()
    }

    pub fn active_session(&self) -> Result<SessionRecord, TurnError> {
        let session_id = self.active_session_id().ok_or(TurnError::NoActiveSession)?;
        Ok(self.store.load(&session_id)?)
    }

    /// Most recent assistant message of the active session.
    pub fn last_reply(&self) -> Result<Option<String>, TurnError> {
        let session = self.active_session()?;
        Ok(session
            .messages
            .into_iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content))
    }

    #[must_use]
    pub fn profile(&self) -> ProviderProfile {
        self.source.profile()
    }

    /// Sends one user message and streams the reply into `on_fragment`.
    ///
    /// Cancellation is not an error: the partial reply is persisted and
    /// returned. A completion failure persists nothing for the assistant, but
    /// the title generated for a first message is still applied.
    pub async fn submit(
        &self,
        text: &str,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<TurnOutcome, TurnError> {
        let _generation = GenerationGuard::acquire(&self.generating).ok_or(TurnError::Busy)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyInput);
        }
        let session_id = self.active_session_id().ok_or(TurnError::NoActiveSession)?;

        self.cancel.store(false, Ordering::Release);
        let first_message = self.store.is_empty(&session_id)?;
        self.store.append(&session_id, Role::User, text)?;
        let session = self.store.load(&session_id)?;
        let context = self
            .context
            .get_context_messages(&session, estimate_tokens(text))
            .await;
        tracing::debug!(
            parent: &self.span,
            %session_id,
            context_messages = context.len(),
            total_tokens = session.total_tokens,
            "starting turn"
        );

        let observed = AtomicBool::new(false);
        let is_cancelled = || {
            let cancelled = self.cancel.load(Ordering::Acquire);
            if cancelled {
                observed.store(true, Ordering::Release);
            }
            cancelled
        };
        let stream = self
            .source
            .stream_completion(&context, &is_cancelled, on_fragment);
        let title = async {
            if first_message {
                Some(self.source.generate_title(text).await)
            } else {
                None
            }
        };
        let (reply, title) = tokio::join!(stream, title);

        // The user message is already stored, so a title skipped here would
        // never be generated.
        if let Some(title) = &title {
            self.store.update_title(&session_id, title)?;
        }
        let reply = reply.inspect_err(|error| {
            tracing::error!(parent: &self.span, %session_id, %error, "turn failed");
        })?;
        // Only a stop the stream actually honoured counts; a signal that lands
        // after the reply finished leaves it complete.
        let cancelled = observed.load(Ordering::Acquire);

        self.store.append(&session_id, Role::Assistant, &reply)?;
        tracing::info!(
            parent: &self.span,
            %session_id,
            cancelled,
            reply_chars = reply.chars().count(),
            "turn finished"
        );

        Ok(TurnOutcome {
            session_id,
            reply,
            cancelled,
            title,
        })
    }

    /// Starts a fresh session, discarding the previous one if it never got a
    /// user message.
    pub fn new_session(&self) -> Result<String, TurnError> {
        self.ensure_idle()?;
        let session_id = self.store.create(&self.system_prompt)?;
        self.switch_to(session_id.clone())?;
        Ok(session_id)
    }

    /// Makes a stored session active.
    pub fn load_session(&self, session_id: &str) -> Result<SessionRecord, TurnError> {
        self.ensure_idle()?;
        let record = self.store.load(session_id)?;
        self.switch_to(record.session_id.clone())?;
        Ok(record)
    }

    /// Deletes a stored session; deleting the active one starts a new session.
    pub fn delete_session(&self, session_id: &str) -> Result<(), TurnError> {
        self.ensure_idle()?;
        let was_active = self.active_session_id().as_deref() == Some(session_id);
        self.store.delete(session_id)?;
        if was_active {
            lock_unpoisoned(&self.active_session).take();
            self.new_session()?;
        }
        Ok(())
    }

    pub fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionSummary>, TurnError> {
        Ok(self.store.list(limit)?)
    }

    pub fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, TurnError> {
        Ok(self.store.search(keyword)?)
    }

    pub fn status(&self) -> Result<RuntimeStatus, TurnError> {
        let session = self.active_session()?;
        Ok(RuntimeStatus {
            message_count: session.conversation_len(),
            session_id: session.session_id,
            title: session.title,
            total_tokens: session.total_tokens,
            compression: self.context.compression_status(),
            provider: self.source.profile(),
            generating: self.is_generating(),
        })
    }

    /// Drops the active session if it never received a user message.
    pub fn shutdown(&self) -> Result<(), TurnError> {
        if let Some(session_id) = lock_unpoisoned(&self.active_session).take() {
            self.discard_if_empty(&session_id)?;
        }
        Ok(())
    }

    fn switch_to(&self, session_id: String) -> Result<(), TurnError> {
        let previous = lock_unpoisoned(&self.active_session).replace(session_id.clone());
        self.context.reset_compression();
        if let Some(previous) = previous.filter(|previous| *previous != session_id) {
            self.discard_if_empty(&previous)?;
        }
        tracing::info!(parent: &self.span, %session_id, "active session changed");
        Ok(())
    }

    fn discard_if_empty(&self, session_id: &str) -> Result<(), TurnError> {
        match self.store.is_empty(session_id) {
            Ok(true) => {
                self.store.delete(session_id)?;
                Ok(())
            }
            Ok(false) | Err(SessionStoreError::NotFound { .. }) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn ensure_idle(&self) -> Result<(), TurnError> {
        if self.is_generating() {
            return Err(TurnError::Busy);
        }
        Ok(())
    }
}

/// Holds the generation flag for one turn and clears it on every exit path.
struct GenerationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> GenerationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
