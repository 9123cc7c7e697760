/// Characters per token assumed by [`estimate_tokens`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count used for every budget decision.
///
/// The session store and the context manager must both use this function, or
/// threshold comparisons drift apart.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}
