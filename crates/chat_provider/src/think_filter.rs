//! Incremental removal of `<think>...</think>` spans from streamed model output.
//!
//! Models that expose their reasoning wrap it in think markers. The filter
//! consumes fragments of any granularity (markers may be split anywhere,
//! including inside the marker text) and emits every character of literal text
//! as soon as it can no longer be the start of a marker.

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

/// Characters held back outside a span: the longest proper prefix of the open marker.
const OPEN_TAIL_CHARS: usize = OPEN_MARKER.len() - 1;
/// Characters retained inside a span while waiting for the close marker.
const CLOSE_TAIL_CHARS: usize = CLOSE_MARKER.len();

/// Streaming scanner state for one completion.
///
/// Spans do not nest: an open marker seen inside a span is span content, and
/// the first close marker ends the span. A close marker seen outside a span is
/// ordinary text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThinkTagFilter {
    buffer: String,
    inside_tag: bool,
}

impl ThinkTagFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the scanner is inside an excluded span.
    #[must_use]
    pub fn is_inside_tag(&self) -> bool {
        self.inside_tag
    }

    /// Feeds one fragment and returns the text that is now safe to emit.
    pub fn process_chunk(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut output = String::new();

        while !self.buffer.is_empty() {
            if self.inside_tag {
                match self.buffer.find(CLOSE_MARKER) {
                    Some(end) => {
                        self.buffer.drain(..end + CLOSE_MARKER.len());
                        self.inside_tag = false;
                    }
                    None => {
                        let keep_from = tail_start(&self.buffer, CLOSE_TAIL_CHARS);
                        self.buffer.drain(..keep_from);
                        break;
                    }
                }
            } else {
                match self.buffer.find(OPEN_MARKER) {
                    Some(start) => {
                        output.push_str(&self.buffer[..start]);
                        self.buffer.drain(..start + OPEN_MARKER.len());
                        self.inside_tag = true;
                    }
                    None => {
                        let keep_from = tail_start(&self.buffer, OPEN_TAIL_CHARS);
                        output.push_str(&self.buffer[..keep_from]);
                        self.buffer.drain(..keep_from);
                        break;
                    }
                }
            }
        }

        output
    }

    /// Flushes buffered literal text once the stream has ended.
    ///
    /// Content of an unterminated span is dropped.
    pub fn finalize(&mut self) -> String {
        let residual = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.inside_tag) {
            String::new()
        } else {
            residual
        }
    }
}

/// Filters a complete (non-streamed) response in one pass.
#[must_use]
pub fn strip_think_tags(text: &str) -> String {
    let mut filter = ThinkTagFilter::new();
    let mut output = filter.process_chunk(text);
    output.push_str(&filter.finalize());
    output
}

/// Byte offset at which the last `chars` characters of `text` begin.
///
/// Returns 0 when `text` has no more than `chars` characters, so slicing at the
/// result never splits a multi-byte character.
fn tail_start(text: &str, chars: usize) -> usize {
    text.char_indices()
        .rev()
        .nth(chars.saturating_sub(1))
        .map_or(0, |(index, _)| index)
}
