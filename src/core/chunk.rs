//! Chunk records produced by token-aware chunking.
//!
//! Chunks for a document form a contiguous cover of its token stream; each
//! adjacent pair overlaps by the configured overlap (except possibly the
//! final pair). Deleting a document cascades to its chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chunk of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning document id.
    pub document_id: String,
    /// 0-based position within the document.
    pub chunk_index: usize,
    /// Decoded chunk text.
    pub text: String,
    /// Number of tokens in the chunk.
    pub token_count: usize,
    /// First token offset in the document's token stream.
    pub start_token: usize,
    /// One past the last token offset.
    pub end_token: usize,
    /// Character offset of the chunk start in the document text.
    pub start_char: usize,
    /// Dense embedding vector, absent when embedding failed or is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// When the chunk was created.
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// Creates a chunk without an embedding.
    #[must_use]
    pub fn new(
        document_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        token_range: (usize, usize),
        start_char: usize,
    ) -> Self {
        let (start_token, end_token) = token_range;
        Self {
            document_id: document_id.into(),
            chunk_index,
            text: text.into(),
            token_count: end_token - start_token,
            start_token,
            end_token,
            start_char,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    /// Stable key identifying the chunk across ranked lists.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}#{}", self.document_id, self.chunk_index)
    }

    /// Whether the chunk carries no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// First `max_len` characters, clipped to a character boundary.
    #[must_use]
    pub fn preview(&self, max_len: usize) -> &str {
        if self.text.len() <= max_len {
            return &self.text;
        }
        let mut end = max_len;
        while !self.text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        &self.text[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk() {
        let chunk = ChunkRecord::new("doc-1", 0, "hello world", (0, 2), 0);
        assert_eq!(chunk.document_id, "doc-1");
        assert_eq!(chunk.token_count, 2);
        assert_eq!(chunk.start_token, 0);
        assert_eq!(chunk.end_token, 2);
        assert!(chunk.embedding.is_none());
    }

    #[test]
    fn test_chunk_key() {
        let chunk = ChunkRecord::new("doc-1", 3, "x", (10, 11), 40);
        assert_eq!(chunk.key(), "doc-1#3");
    }

    #[test]
    fn test_preview_clips_char_boundary() {
        let chunk = ChunkRecord::new("doc-1", 0, "héllo", (0, 1), 0);
        // 'é' is two bytes; preview(2) must not split it
        assert_eq!(chunk.preview(2), "h");
        assert_eq!(chunk.preview(100), "héllo");
    }

    #[test]
    fn test_serde_round_trip() {
        let mut chunk = ChunkRecord::new("doc-1", 1, "text", (5, 6), 20);
        chunk.embedding = Some(vec![0.1, 0.2]);
        let json = serde_json::to_string(&chunk).unwrap();
        let back: ChunkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = ChunkRecord::new("doc-1", 0, "", (0, 0), 0);
        assert!(chunk.is_empty());
        assert_eq!(chunk.token_count, 0);
    }
}
