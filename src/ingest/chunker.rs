//! Token-aware chunking with overlap.
//!
//! Chunks tile the document's token stream contiguously; each adjacent pair
//! overlaps by exactly the configured overlap so context survives chunk
//! boundaries. Tokens are word-bounded segments with trailing whitespace
//! attached, which makes decoding lossless: a chunk's text is the exact
//! substring its token range covers.
//!
//! When no tokenizer is available the chunker degrades to a character
//! approximation (4 chars per token) and callers mark the document
//! accordingly.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};

/// Default chunk size in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 700;

/// Default overlap in tokens (20% of the default chunk size).
pub const DEFAULT_OVERLAP_TOKENS: usize = 140;

/// Heuristic characters-per-token ratio for the degraded mode.
pub const CHARS_PER_TOKEN: usize = 4;

/// One chunk of text with its position in the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChunk {
    /// Decoded chunk text.
    pub text: String,
    /// First token offset.
    pub start_token: usize,
    /// One past the last token offset.
    pub end_token: usize,
    /// Character offset of the chunk start in the source text.
    pub start_char: usize,
}

/// Token-aware chunker.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    max_tokens: usize,
    overlap_tokens: usize,
    degraded: bool,
}

impl Default for TokenChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS)
    }
}

impl TokenChunker {
    /// Creates a chunker with the given size and overlap.
    #[must_use]
    pub const fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            degraded: false,
        }
    }

    /// Creates a chunker running the character-based approximation.
    #[must_use]
    pub const fn degraded(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            degraded: true,
        }
    }

    /// Whether this chunker runs in the degraded character mode.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the chunk size is zero or the overlap is not
    /// smaller than the chunk size.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::invariant("max_tokens must be > 0"));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(Error::invariant(format!(
                "overlap {} must be less than chunk size {}",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }

    /// Splits text into overlapping chunks.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration.
    pub fn chunk(&self, text: &str) -> Result<Vec<TokenChunk>> {
        self.validate()?;

        if text.is_empty() {
            return Ok(vec![]);
        }

        if self.degraded {
            return Ok(self.chunk_by_chars(text));
        }
        Ok(self.chunk_by_tokens(text))
    }

    fn chunk_by_tokens(&self, text: &str) -> Vec<TokenChunk> {
        let spans = tokenize(text);
        let total = spans.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let end = (start + self.max_tokens).min(total);
            let byte_start = spans[start].byte_start;
            let byte_end = spans[end - 1].byte_end;

            chunks.push(TokenChunk {
                text: text[byte_start..byte_end].to_string(),
                start_token: start,
                end_token: end,
                start_char: spans[start].char_start,
            });

            if end >= total {
                break;
            }
            start = end - self.overlap_tokens;
        }

        chunks
    }

    /// Character-window approximation: 4 chars per token.
    fn chunk_by_chars(&self, text: &str) -> Vec<TokenChunk> {
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;
        let window = self.max_tokens * CHARS_PER_TOKEN;
        let overlap = self.overlap_tokens * CHARS_PER_TOKEN;

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + window).min(total_chars);
            let chunk_text = text[boundaries[start]..boundaries[end]].to_string();
            let start_token = start / CHARS_PER_TOKEN;

            chunks.push(TokenChunk {
                start_token,
                end_token: start_token + (end - start).div_ceil(CHARS_PER_TOKEN),
                start_char: start,
                text: chunk_text,
            });

            if end >= total_chars {
                break;
            }
            start = end - overlap;
        }

        chunks
    }
}

/// One token's position: a word-bounded segment with trailing whitespace.
struct TokenSpan {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
}

/// Tokenizes text into word-bounded spans covering it exactly.
///
/// Whitespace segments are folded into the preceding token so that the
/// concatenation of all spans reproduces the input byte for byte.
fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut spans: Vec<TokenSpan> = Vec::new();
    let mut char_offset = 0;

    for (byte_start, segment) in text.split_word_bound_indices() {
        let is_whitespace = segment.chars().all(char::is_whitespace);
        if is_whitespace && let Some(last) = spans.last_mut() {
            last.byte_end = byte_start + segment.len();
        } else {
            spans.push(TokenSpan {
                byte_start,
                byte_end: byte_start + segment.len(),
                char_start: char_offset,
            });
        }
        char_offset += segment.chars().count();
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        let chunker = TokenChunker::new(10, 2);
        assert!(chunker.chunk("").unwrap().is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = TokenChunker::new(100, 20);
        let text = words(5);
        let chunks = chunker.chunk(&text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].start_token, 0);
        assert_eq!(chunks[0].end_token, 5);
    }

    #[test]
    fn test_overlap_exact() {
        let chunker = TokenChunker::new(10, 2);
        let chunks = chunker.chunk(&words(30)).unwrap();

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // Adjacent chunks overlap by exactly the configured overlap.
            assert_eq!(pair[0].end_token - pair[1].start_token, 2);
        }
    }

    #[test]
    fn test_cover_is_contiguous() {
        let chunker = TokenChunker::new(10, 2);
        let chunks = chunker.chunk(&words(47)).unwrap();

        assert_eq!(chunks[0].start_token, 0);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_token < pair[0].end_token);
        }
        assert_eq!(chunks.last().unwrap().end_token, 47);
    }

    #[test]
    fn test_decoded_text_matches_source() {
        let chunker = TokenChunker::new(5, 1);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunker.chunk(text).unwrap();

        for chunk in &chunks {
            // Every chunk is an exact substring at its recorded offset.
            let found = text
                .char_indices()
                .nth(chunk.start_char)
                .map(|(byte, _)| byte)
                .unwrap_or(text.len());
            assert!(text[found..].starts_with(&chunk.text));
        }
    }

    #[test]
    fn test_final_chunk_may_be_short() {
        let chunker = TokenChunker::new(10, 2);
        let chunks = chunker.chunk(&words(12)).unwrap();
        assert_eq!(chunks.len(), 2);
        let last = chunks.last().unwrap();
        assert!(last.end_token - last.start_token < 10);
        assert_eq!(last.end_token, 12);
    }

    #[test]
    fn test_unicode_text() {
        let chunker = TokenChunker::new(4, 1);
        let text = "日本語 テキスト の 分割 処理 を 確認 する";
        let chunks = chunker.chunk(text).unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks.last().unwrap().end_token, 8);
        // Reconstructed prefix of each chunk is valid UTF-8 by construction.
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn test_invalid_config() {
        assert!(TokenChunker::new(0, 0).chunk("text").is_err());
        assert!(TokenChunker::new(10, 10).chunk("text").is_err());
        assert!(TokenChunker::new(10, 11).chunk("text").is_err());
    }

    #[test]
    fn test_degraded_mode_windows() {
        let chunker = TokenChunker::degraded(10, 2);
        assert!(chunker.is_degraded());

        let text = "x".repeat(100);
        let chunks = chunker.chunk(&text).unwrap();
        // 40-char windows stepping by 32.
        assert_eq!(chunks[0].text.len(), 40);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[1].start_char, 32);
        assert_eq!(chunks.last().unwrap().start_char + chunks.last().unwrap().text.len(), 100);
    }

    #[test]
    fn test_degraded_mode_respects_char_boundaries() {
        let chunker = TokenChunker::degraded(1, 0);
        let text = "ééééééé";
        let chunks = chunker.chunk(text).unwrap();
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_tokenize_covers_input() {
        let text = "hello,  world!\nnew line";
        let spans = tokenize(text);
        assert_eq!(spans[0].byte_start, 0);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].byte_end, pair[1].byte_start);
        }
        assert_eq!(spans.last().unwrap().byte_end, text.len());
    }

    proptest! {
        /// Chunk-cover invariant: token ranges tile [0, N) with the exact
        /// configured overlap between adjacent pairs.
        #[test]
        fn chunk_cover_property(
            word_count in 1usize..200,
            max_tokens in 2usize..50,
            overlap in 0usize..10,
        ) {
            prop_assume!(overlap < max_tokens);
            let chunker = TokenChunker::new(max_tokens, overlap);
            let text = words(word_count);
            let chunks = chunker.chunk(&text).unwrap();

            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(chunks[0].start_token, 0);
            prop_assert_eq!(chunks.last().unwrap().end_token, word_count);

            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end_token - pair[1].start_token, overlap);
            }
            for chunk in &chunks {
                prop_assert!(chunk.end_token - chunk.start_token <= max_tokens);
            }
        }

        /// Degraded mode reconstructs the source from non-overlapping parts.
        #[test]
        fn degraded_cover_property(len in 1usize..400) {
            let chunker = TokenChunker::degraded(8, 0);
            let text: String = ('a'..='z').cycle().take(len).collect();
            let chunks = chunker.chunk(&text).unwrap();
            let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
            prop_assert_eq!(rebuilt, text);
        }
    }
}
