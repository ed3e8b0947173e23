//! Token-bounded text splitting for embedding requests.
//!
//! The provider enforces a per-request token budget, so oversized text is
//! split into pieces whose estimated token counts stay under the configured
//! threshold. Splitting is lossless: concatenating the returned chunks
//! reconstructs the input byte-for-byte, which keeps the chunk layout (and
//! therefore the embedding input) stable across re-ingestions.

/// Approximate chars-per-token ratio used by the token estimate. Must stay
/// constant across ingestion and re-ingestion for idempotence.
const CHARS_PER_TOKEN: usize = 4;

/// Cheap token estimate: byte length divided by [`CHARS_PER_TOKEN`].
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Split `text` into chunks whose estimated token counts are at most
/// `max_tokens`. Text under the threshold is returned unchanged as a
/// single chunk; empty text yields no chunks.
///
/// Guarantees:
/// - concatenating the chunks reconstructs `text` exactly;
/// - no chunk is empty;
/// - every chunk satisfies `estimate_tokens(chunk) <= max_tokens`.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_chars {
        // Largest valid UTF-8 boundary at or below the budget.
        let mut split = max_chars;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }

        // Prefer to break just after whitespace; the whitespace stays in
        // the left chunk so nothing is dropped.
        if let Some(pos) = rest[..split].rfind(char::is_whitespace) {
            split = pos + rest[pos..].chars().next().map_or(1, |c| c.len_utf8());
        }

        chunks.push(rest[..split].to_string());
        rest = &rest[split..];
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("Hello, world!", 7000);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 7000).is_empty());
    }

    #[test]
    fn test_lossless_reconstruction() {
        let text = (0..200)
            .map(|i| format!("word{} and some filler text here. ", i))
            .collect::<String>();
        let chunks = split_text(&text, 100);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_every_chunk_under_budget() {
        let text = "lorem ipsum dolor sit amet ".repeat(300);
        let max_tokens = 50;
        for chunk in split_text(&text, max_tokens) {
            assert!(!chunk.is_empty());
            assert!(
                estimate_tokens(&chunk) <= max_tokens,
                "chunk over budget: {} tokens",
                estimate_tokens(&chunk)
            );
        }
    }

    #[test]
    fn test_lossless_without_whitespace() {
        // No whitespace to break on: falls back to hard splits.
        let text = "a".repeat(5000);
        let chunks = split_text(&text, 100);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunk.len() <= 100 * CHARS_PER_TOKEN);
        }
    }

    #[test]
    fn test_lossless_multibyte() {
        // Splits must land on UTF-8 boundaries without losing bytes.
        let text = "日本語のテキスト ".repeat(400);
        let chunks = split_text(&text, 50);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 50);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "alpha beta gamma delta ".repeat(200);
        assert_eq!(split_text(&text, 30), split_text(&text, 30));
    }
}
