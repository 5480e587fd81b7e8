//! Extractor capability: raw bytes + media type to plain text.
//!
//! Binary formats (PDF, word processing, presentations, OCR) are external
//! collaborators. The built-in extractor covers the text-like media types so
//! the pipeline is useful without any provider wired in; everything else
//! fails with [`Error::ExtractionFailed`], which ingestion absorbs per file.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Turns raw bytes and a media type into plain text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extracts plain text from the content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtractionFailed`] for unsupported media types or
    /// parser failures; callers skip the file with a warning.
    async fn extract(&self, content: &[u8], media_type: &str) -> Result<String>;
}

/// Built-in extractor for text-like media types.
///
/// Handles `text/*`, JSON, XML (tag-stripped), and CSV/TSV (flattened to
/// whitespace-joined rows).
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExtractor;

impl BuiltinExtractor {
    /// Creates the built-in extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decode(content: &[u8]) -> String {
        String::from_utf8_lossy(content).into_owned()
    }

    /// Strips tags from XML-ish content, keeping text nodes.
    fn strip_tags(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_tag = false;
        for c in text.chars() {
            match c {
                '<' => in_tag = true,
                '>' => {
                    in_tag = false;
                    out.push(' ');
                }
                c if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Flattens CSV rows into whitespace-joined lines.
    fn flatten_csv(content: &[u8], media_type: &str) -> Result<String> {
        let delimiter = if media_type.contains("tab") {
            b'\t'
        } else {
            b','
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(content);

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::ExtractionFailed {
                media_type: media_type.to_string(),
                reason: e.to_string(),
            })?;
            lines.push(record.iter().collect::<Vec<_>>().join(" "));
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Extractor for BuiltinExtractor {
    async fn extract(&self, content: &[u8], media_type: &str) -> Result<String> {
        let media = media_type.to_lowercase();

        if media == "text/csv" || media == "text/tab-separated-values" {
            return Self::flatten_csv(content, &media);
        }
        if media == "application/xml" || media == "text/xml" {
            return Ok(Self::strip_tags(&Self::decode(content)));
        }
        if media.starts_with("text/") || media.contains("json") {
            return Ok(Self::decode(content));
        }

        Err(Error::ExtractionFailed {
            media_type: media_type.to_string(),
            reason: "no extractor for media type".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let extractor = BuiltinExtractor::new();
        let text = extractor
            .extract(b"hello world", "text/plain")
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_json_passthrough() {
        let extractor = BuiltinExtractor::new();
        let text = extractor
            .extract(br#"{"a":1}"#, "application/json")
            .await
            .unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_xml_tag_stripping() {
        let extractor = BuiltinExtractor::new();
        let text = extractor
            .extract(b"<doc><title>Report</title><body>Findings here</body></doc>", "application/xml")
            .await
            .unwrap();
        assert_eq!(text, "Report Findings here");
    }

    #[tokio::test]
    async fn test_csv_flattening() {
        let extractor = BuiltinExtractor::new();
        let text = extractor
            .extract(b"name,score\nalice,10\nbob,20\n", "text/csv")
            .await
            .unwrap();
        assert_eq!(text, "name score\nalice 10\nbob 20");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let extractor = BuiltinExtractor::new();
        let text = extractor
            .extract(&[0x68, 0x69, 0xFF], "text/plain")
            .await
            .unwrap();
        assert!(text.starts_with("hi"));
    }

    #[test_case("application/pdf")]
    #[test_case("application/vnd.openxmlformats-officedocument.wordprocessingml.document")]
    #[test_case("image/png")]
    #[tokio::test]
    async fn test_unsupported_media_fails(media_type: &str) {
        let extractor = BuiltinExtractor::new();
        let err = extractor.extract(b"binary", media_type).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }
}
