//! Compact output rendering helpers for CLI surfaces.
//!
//! Sub-validator diagnostics can run to thousands of lines; these keep what
//! reaches the terminal bounded while preserving the signal.

/// Collapse whitespace runs to single spaces and cut at `max_chars`,
/// marking the cut with `...`.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}

/// First `max_items` messages joined with ` | `, plus a count of the rest.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    let mut shown: Vec<String> = Vec::with_capacity(max_items.min(messages.len()));
    for message in messages.iter().take(max_items) {
        shown.push(compact_line(message, max_chars));
    }
    let hidden = messages.len().saturating_sub(max_items);
    match hidden {
        0 => shown.join(" | "),
        n => format!("{} (+{} more)", shown.join(" | "), n),
    }
}

/// Keep the last `max_lines` non-empty lines of a process stream.
pub fn tail_lines(stream: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stream.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_line_truncates_and_collapses() {
        assert_eq!(compact_line("a\n  b\tc", 10), "a b c");
        assert_eq!(compact_line("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn preview_messages_counts_hidden_items() {
        let msgs = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&msgs, 2, 20), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 20), "");
    }

    #[test]
    fn tail_lines_skips_blank_lines() {
        let stream = "first\n\nsecond\nthird\n\n";
        assert_eq!(tail_lines(stream, 2), "second\nthird");
        assert_eq!(tail_lines("", 3), "");
    }
}
