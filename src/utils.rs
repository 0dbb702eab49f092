//! Small shared helpers.

/// Truncate a string to at most `max_chars` characters, appending "..." when
/// something was cut. UTF-8 safe: counts characters, not bytes, so Cyrillic
/// queries and emoji never split mid-codepoint.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        // Byte length <= max_chars implies char count <= max_chars.
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix = "...";
    if max_chars <= suffix.len() {
        return suffix.chars().take(max_chars).collect();
    }
    let take = max_chars - suffix.len();
    let mut out: String = s.chars().take(take).collect();
    out.push_str(suffix);
    out
}
