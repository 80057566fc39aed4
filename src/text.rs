//! Normalization and truncation for OCR-extracted text.
//!
//! Mirrors `app/text_utils.py` in the source system: normalize first,
//! truncate second, always in that order (spec §4.6).

/// Strip NULs, normalize line endings, collapse excess whitespace, trim.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let stripped: String = text.chars().filter(|&c| c != '\0').collect();

    // CRLF/CR -> LF
    let mut unified = String::with_capacity(stripped.len());
    let mut chars = stripped.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                unified.push('\n');
            }
            other => unified.push(other),
        }
    }

    // collapse runs of >=3 newlines down to exactly two
    let mut collapsed = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for c in unified.chars() {
        if c == '\n' {
            newline_run += 1;
        } else {
            if newline_run > 0 {
                collapsed.push_str(&"\n".repeat(newline_run.min(2)));
                newline_run = 0;
            }
            collapsed.push(c);
        }
    }
    if newline_run > 0 {
        collapsed.push_str(&"\n".repeat(newline_run.min(2)));
    }

    // per-line: trim, collapse intra-line spaces
    let lines: Vec<String> = collapsed
        .split('\n')
        .map(|line| collapse_spaces(line.trim()))
        .collect();

    lines.join("\n").trim().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_was_space = false;
    for c in line.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Truncate `text` to at most `max_bytes` UTF-8 bytes, shrinking until the
/// slice decodes cleanly. Returns `(truncated_text, was_truncated)`.
pub fn truncate(text: &str, max_bytes: usize) -> (String, bool) {
    let bytes = text.as_bytes();
    if bytes.len() <= max_bytes {
        return (text.to_string(), false);
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    (text[..end].to_string(), true)
}

/// Truncate `text` to at most `max_chars` Unicode scalar values, matching
/// Python's `text[:n]` slicing. Returns `(truncated_text, was_truncated)`.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    let was_truncated = chars.next().is_some();
    (head, was_truncated)
}
