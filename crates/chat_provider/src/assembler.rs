use crate::think_filter::ThinkTagFilter;

/// Turns raw streamed deltas into display fragments.
///
/// Every completion source routes its deltas through one assembler per
/// response so that think spans are removed, the first visible fragment is
/// left-trimmed, and the accumulated text matches what was emitted.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    filter: ThinkTagFilter,
    text: String,
}

impl FragmentAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw delta; returns the fragment to emit, if any.
    pub fn push(&mut self, raw: &str) -> Option<String> {
        let filtered = self.filter.process_chunk(raw);
        self.accept(filtered)
    }

    /// Flushes the filter at end of stream; returns the final fragment, if any.
    pub fn finish(&mut self) -> Option<String> {
        let residual = self.filter.finalize();
        self.accept(residual)
    }

    /// Text emitted so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    fn accept(&mut self, fragment: String) -> Option<String> {
        let fragment = if self.text.is_empty() {
            fragment.trim_start().to_string()
        } else {
            fragment
        };

        if fragment.is_empty() {
            return None;
        }

        self.text.push_str(&fragment);
        Some(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::FragmentAssembler;

    fn collect(deltas: &[&str]) -> (Vec<String>, String) {
        let mut assembler = FragmentAssembler::new();
        let mut emitted: Vec<String> = deltas
            .iter()
            .filter_map(|delta| assembler.push(delta))
            .collect();
        emitted.extend(assembler.finish());
        (emitted, assembler.into_text())
    }

    #[test]
    fn only_first_visible_fragment_is_trimmed() {
        let (emitted, text) = collect(&["  Hello there", " and", " more text here"]);
        assert_eq!(text, "Hello there and more text here");
        assert!(emitted[0].starts_with("Hello"));
        assert_eq!(emitted.concat(), text);
    }

    #[test]
    fn whitespace_after_think_span_is_trimmed() {
        let (_, text) = collect(&["<think>plan</think>\n\n", "Answer: 42 and done"]);
        assert_eq!(text, "Answer: 42 and done");
    }

    #[test]
    fn whitespace_only_fragments_wait_for_visible_text() {
        let mut assembler = FragmentAssembler::new();
        assert_eq!(assembler.push("        "), None);
        assert_eq!(assembler.push("x"), None);
        assert_eq!(assembler.finish().as_deref(), Some("x"));
        assert_eq!(assembler.text(), "x");
    }

    #[test]
    fn later_leading_spaces_are_preserved() {
        let (_, text) = collect(&["first line is long", "   indented"]);
        assert_eq!(text, "first line is long   indented");
    }
}
