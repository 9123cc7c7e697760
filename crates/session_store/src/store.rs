use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chat_provider::{estimate_tokens, truncate_display, Role};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionStoreError;
use crate::paths::{is_valid_session_id, session_file_name, session_id_from_file_name};
use crate::schema::{
    MatchKind, SearchHit, SessionRecord, SessionSummary, StoredMessage, DEFAULT_TITLE,
};

/// Display width of the message excerpt attached to content search hits.
pub const PREVIEW_MAX_WIDTH: usize = 100;

const ID_SUFFIX_LEN: usize = 6;

/// Directory of `session_<id>.json` documents.
///
/// Every mutation loads the document, applies the change and rewrites the
/// whole file through a temporary sibling and a rename. One writer per
/// directory is assumed.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    span: tracing::Span,
}

impl SessionStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;
        let span = tracing::info_span!("session_store", root = %root.display());
        Ok(Self { root, span })
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `session_id`.
    pub fn path_for(&self, session_id: &str) -> Result<PathBuf, SessionStoreError> {
        if !is_valid_session_id(session_id) {
            return Err(SessionStoreError::InvalidSessionId {
                session_id: session_id.to_string(),
            });
        }
        Ok(self.root.join(session_file_name(session_id)))
    }

    /// Creates a session holding only the system prompt and returns its id.
    pub fn create(&self, system_prompt: &str) -> Result<String, SessionStoreError> {
        let now = OffsetDateTime::now_utc();
        let session_id = new_session_id(now)?;
        let timestamp = format_rfc3339(now)?;
        let system = StoredMessage {
            role: Role::System,
            content: system_prompt.to_string(),
            timestamp: timestamp.clone(),
            tokens: estimate_tokens(system_prompt),
        };

        let record = SessionRecord {
            session_id: session_id.clone(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            title: DEFAULT_TITLE.to_string(),
            total_tokens: system.tokens,
            messages: vec![system],
        };
        self.write(&record)?;
        tracing::info!(parent: &self.span, %session_id, "created session");
        Ok(session_id)
    }

    pub fn load(&self, session_id: &str) -> Result<SessionRecord, SessionStoreError> {
        let path = self.path_for(session_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(SessionStoreError::not_found(session_id));
            }
            Err(source) => {
                return Err(SessionStoreError::io("reading session file", &path, source));
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| SessionStoreError::json(&path, source))
    }

    /// Appends one message, keeping `total_tokens` equal to the sum of
    /// message token counts.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, SessionStoreError> {
        let mut record = self.load(session_id)?;
        let timestamp = format_rfc3339(OffsetDateTime::now_utc())?;
        let message = StoredMessage {
            role,
            content: content.to_string(),
            timestamp: timestamp.clone(),
            tokens: estimate_tokens(content),
        };

        record.total_tokens += message.tokens;
        record.updated_at = timestamp;
        record.messages.push(message.clone());
        self.write(&record)?;
        tracing::debug!(
            parent: &self.span,
            %session_id,
            %role,
            tokens = message.tokens,
            total_tokens = record.total_tokens,
            "appended message"
        );
        Ok(message)
    }

    pub fn update_title(&self, session_id: &str, title: &str) -> Result<(), SessionStoreError> {
        let mut record = self.load(session_id)?;
        record.title = title.to_string();
        record.updated_at = format_rfc3339(OffsetDateTime::now_utc())?;
        self.write(&record)
    }

    /// True when the session never received a user message.
    pub fn is_empty(&self, session_id: &str) -> Result<bool, SessionStoreError> {
        Ok(!self.load(session_id)?.has_user_messages())
    }

    pub fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let path = self.path_for(session_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(parent: &self.span, %session_id, "deleted session");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(SessionStoreError::not_found(session_id))
            }
            Err(source) => Err(SessionStoreError::io("deleting session file", &path, source)),
        }
    }

    /// Sessions ordered newest `updated_at` first, at most `limit` of them.
    ///
    /// Unreadable or corrupt files are skipped.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let summaries = self
            .read_all()?
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|record| SessionSummary {
                message_count: record.conversation_len(),
                session_id: record.session_id,
                title: record.title,
                created_at: record.created_at,
                updated_at: record.updated_at,
            })
            .collect();
        Ok(summaries)
    }

    /// Case-insensitive search over titles and message content.
    ///
    /// A title match wins over content matches for the same session. Content
    /// matching skips the system prompt, which every session shares.
    pub fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, SessionStoreError> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .read_all()?
            .into_iter()
            .filter_map(|record| search_record(record, &needle))
            .collect();
        Ok(hits)
    }

    /// Every readable session, newest `updated_at` first.
    fn read_all(&self) -> Result<Vec<SessionRecord>, SessionStoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| {
            SessionStoreError::io("listing session directory", &self.root, source)
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(parent: &self.span, %error, "skipping unreadable directory entry");
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(session_id) = file_name.to_str().and_then(session_id_from_file_name) else {
                continue;
            };
            match self.load(session_id) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(parent: &self.span, %session_id, %error, "skipping corrupt session file");
                }
            }
        }

        records.sort_by_cached_key(|record| {
            (
                Reverse(parse_timestamp(&record.updated_at)),
                Reverse(record.session_id.clone()),
            )
        });
        Ok(records)
    }

    fn write(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let path = self.path_for(&record.session_id)?;
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, bytes)
            .map_err(|source| SessionStoreError::io("writing session file", &temp_path, source))?;
        fs::rename(&temp_path, &path)
            .map_err(|source| SessionStoreError::io("replacing session file", &path, source))
    }
}

fn search_record(record: SessionRecord, needle: &str) -> Option<SearchHit> {
    if record.title.to_lowercase().contains(needle) {
        return Some(SearchHit {
            session_id: record.session_id,
            title: record.title,
            updated_at: record.updated_at,
            match_kind: MatchKind::Title,
            preview: None,
        });
    }

    let preview = record
        .messages
        .iter()
        .skip(1)
        .find(|message| message.content.to_lowercase().contains(needle))
        .map(|message| truncate_display(&message.content, PREVIEW_MAX_WIDTH, "..."))?;

    Some(SearchHit {
        session_id: record.session_id,
        title: record.title,
        updated_at: record.updated_at,
        match_kind: MatchKind::Content,
        preview: Some(preview),
    })
}

fn format_rfc3339(at: OffsetDateTime) -> Result<String, SessionStoreError> {
    at.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

fn new_session_id(at: OffsetDateTime) -> Result<String, SessionStoreError> {
    let stamp = at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]_[subsecond digits:6]"
        ))
        .map_err(SessionStoreError::ClockFormat)?;
    let suffix = Uuid::new_v4().simple().to_string();
    Ok(format!("{stamp}_{}", &suffix[..ID_SUFFIX_LEN]))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{new_session_id, parse_timestamp};
    use crate::paths::is_valid_session_id;

    #[test]
    fn session_id_embeds_utc_timestamp() {
        let id = new_session_id(datetime!(2026-02-14 10:15:00.123456 UTC)).expect("id");
        assert!(id.starts_with("20260214_101500_123456_"), "{id}");
        assert_eq!(id.len(), "20260214_101500_123456_".len() + 6);
        assert!(is_valid_session_id(&id));
    }

    #[test]
    fn session_ids_are_unique_within_one_instant() {
        let at = datetime!(2026-02-14 10:15:00 UTC);
        let first = new_session_id(at).expect("first");
        let second = new_session_id(at).expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn timestamps_parse_as_rfc3339() {
        assert!(parse_timestamp("2026-02-14T10:15:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
