//! Text chunking for generation.
//!
//! Splits extracted text into overlap-free chunks at sentence or paragraph
//! boundaries so each chunk fits a single generation request.

/// Splits `text` into chunks of at most `chunk_size` characters, preferring
/// to break at a paragraph boundary, then a sentence boundary, then a line
/// break. Chunks are trimmed; empty chunks are dropped.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 || text.len() <= chunk_size {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        // Never split inside a multi-byte character.
        while end < text.len() && !text.is_char_boundary(end) {
            end -= 1;
        }
        // The character at `start` can be wider than chunk_size; take it
        // whole so the loop always advances.
        if end <= start {
            end = start + 1;
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }

        if end < text.len() {
            let window = &text[start..end];
            if let Some(pos) = best_break(window) {
                end = start + pos;
            }
        }

        let chunk = text[start..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        start = end;
    }

    chunks
}

/// Byte offset just past the best break point in `window`, or `None` when no
/// boundary exists and a hard split is required.
fn best_break(window: &str) -> Option<usize> {
    let paragraph = window.rfind("\n\n").map(|p| p + 2);
    let sentence = [". ", "? ", "! "]
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|p| p + 2))
        .max();
    let line = window.rfind('\n').map(|p| p + 1);

    paragraph.or(sentence).or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("Short text.", 4000);
        assert_eq!(chunks, vec!["Short text."]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("   \n ", 4000).is_empty());
    }

    #[test]
    fn test_breaks_at_sentence_boundary() {
        let text = "First sentence here. Second sentence follows. Third one ends it.";
        let chunks = split_text(text, 30);

        assert!(chunks.len() > 1);
        // Each chunk ends at a sentence, not mid-word
        assert!(chunks[0].ends_with('.'));
        // No text lost, no overlap
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = "Paragraph one text here.\n\nParagraph two text here.";
        let chunks = split_text(text, 30);

        assert_eq!(chunks[0], "Paragraph one text here.");
    }

    #[test]
    fn test_hard_split_without_boundaries() {
        let text = "x".repeat(100);
        let chunks = split_text(&text, 40);

        assert_eq!(chunks.len(), 3);
        let total: usize = chunks.iter().map(String::len).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_chunk_size_smaller_than_char_still_terminates() {
        // "€" is 3 bytes; a 2-byte chunk size must not stall on it
        let chunks = split_text("ab€cd", 2);
        assert_eq!(chunks.join(""), "ab€cd");
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "é".repeat(50);
        // 100 bytes total; naive split at 45 would land mid-char
        let chunks = split_text(&text, 45);
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(total, 50);
    }
}
