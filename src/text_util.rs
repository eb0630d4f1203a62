/// Maximum number of characters shown in a single-line preview.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 160;

/// Clean up text extracted from a document.
///
/// Control characters are dropped, runs of horizontal whitespace collapse
/// to a single space, lines are trimmed, and runs of blank lines collapse to
/// one blank line.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;

    for line in text.lines() {
        let mut cleaned = String::with_capacity(line.len());
        let mut pending_space = false;
        for c in line.chars() {
            if c.is_whitespace() {
                pending_space = !cleaned.is_empty();
            } else if !c.is_control() {
                if pending_space {
                    cleaned.push(' ');
                    pending_space = false;
                }
                cleaned.push(c);
            }
        }

        if cleaned.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&cleaned);
    }

    out
}

/// Return the longest prefix of `text` holding at most `max_chars` chars.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Single-line preview of `text`, cut to `max_chars` with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut short = truncate_chars(&flat, max_chars).trim_end().to_string();
    short.push_str("...");
    short
}
