//! Character-safe truncation helpers for prompt and feedback text.

/// Return at most `max_chars` leading characters of `text` and whether anything was cut.
pub fn head_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Return at most `max_chars` trailing characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Truncate to `max_chars`, appending `suffix` when something was removed.
pub fn clip(text: &str, max_chars: usize, suffix: &str) -> String {
    let (head, cut) = head_chars(text, max_chars);
    if cut {
        format!("{head}{suffix}")
    } else {
        head.to_string()
    }
}
