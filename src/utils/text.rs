/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Drops a surrounding ```` ``` ```` / ```` ```json ```` fence if the model added one.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}
