pub mod taxonomy;
pub mod types;

/// Truncate content to at most `max_chars` bytes on a char boundary, appending "..." if cut.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }
    let end = content
        .char_indices()
        .take_while(|(i, _)| *i < max_chars)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    format!("{}...", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short", 80), "short");
        let long = "word ".repeat(40);
        let preview = truncate_preview(&long, 20);
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 24);
    }

    #[test]
    fn test_truncate_preview_multibyte() {
        let preview = truncate_preview("éééééééééé", 5);
        assert!(preview.ends_with("..."));
        assert!(preview.starts_with("éé"));
    }
}
