pub const SESSION_FILE_PREFIX: &str = "session_";
pub const SESSION_FILE_SUFFIX: &str = ".json";

/// Session ids are generated by the store and only contain ASCII
/// alphanumerics, `_` and `-`; anything else could escape the root directory.
#[must_use]
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[must_use]
pub fn session_file_name(session_id: &str) -> String {
    format!("{SESSION_FILE_PREFIX}{session_id}{SESSION_FILE_SUFFIX}")
}

pub(crate) fn session_id_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(SESSION_FILE_PREFIX)?
        .strip_suffix(SESSION_FILE_SUFFIX)
        .filter(|id| is_valid_session_id(id))
}
