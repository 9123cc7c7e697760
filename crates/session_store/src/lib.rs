mod error;
mod paths;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use paths::{is_valid_session_id, session_file_name, SESSION_FILE_PREFIX, SESSION_FILE_SUFFIX};
pub use schema::{MatchKind, SearchHit, SessionRecord, SessionSummary, StoredMessage, DEFAULT_TITLE};
pub use store::{SessionStore, PREVIEW_MAX_WIDTH};
