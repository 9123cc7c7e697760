use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Truncates `text` to at most `max_width` terminal columns.
///
/// Wide characters count as two columns and grapheme clusters are never split.
/// When truncation happens `suffix` is appended and counted inside the budget.
#[must_use]
pub fn truncate_display(text: &str, max_width: usize, suffix: &str) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }

    let budget = max_width.saturating_sub(suffix.width());
    let mut used = 0usize;
    let mut out = String::new();
    for grapheme in text.graphemes(true) {
        let width = grapheme.width();
        if used + width > budget {
            break;
        }
        used += width;
        out.push_str(grapheme);
    }

    out.push_str(suffix);
    out
}
