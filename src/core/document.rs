//! Document records with full provenance.
//!
//! A document's id is derived from its content hash, so re-ingesting the
//! same bytes is a no-op regardless of where they came from. Provenance is a
//! source-specific sub-record preserved verbatim for citation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a document originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Remote folder provider with push notifications.
    Drive,
    /// Object storage bucket.
    Gcs,
    /// Local or mounted filesystem.
    Local,
    /// Mail inbox attachment.
    Email,
}

impl SourceKind {
    /// Wire name of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Gcs => "gcs",
            Self::Local => "local",
            Self::Email => "email",
        }
    }
}

/// Source-specific provenance sub-record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Provenance {
    /// Remote folder provider file.
    Drive {
        /// Provider file id.
        file_id: String,
        /// Shareable link to the file.
        drive_link: String,
    },
    /// Object storage blob.
    Gcs {
        /// Full object URI.
        uri: String,
    },
    /// Local filesystem file.
    Local {
        /// Absolute path at ingestion time.
        path: String,
    },
    /// Mail attachment with its message headers.
    Email {
        /// Message subject line.
        subject: String,
        /// Sender address.
        sender: String,
        /// Message date header.
        date: String,
        /// Provider message id.
        message_id: String,
    },
}

impl Provenance {
    /// The source kind this provenance belongs to.
    #[must_use]
    pub const fn source(&self) -> SourceKind {
        match self {
            Self::Drive { .. } => SourceKind::Drive,
            Self::Gcs { .. } => SourceKind::Gcs,
            Self::Local { .. } => SourceKind::Local,
            Self::Email { .. } => SourceKind::Email,
        }
    }

    /// A citable link for the document, when the source has one.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::Drive { drive_link, .. } => Some(drive_link),
            Self::Gcs { uri } => Some(uri),
            Self::Local { path } => Some(path),
            Self::Email { .. } => None,
        }
    }
}

/// A persisted document with ingestion metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Content-derived id (first 16 hex chars of the content hash).
    pub id: String,
    /// Display name (file name or attachment name).
    pub name: String,
    /// Media type as reported by the source.
    pub media_type: String,
    /// Full cryptographic content hash; unique across live documents.
    pub content_hash: String,
    /// External version token, when the source tracks revisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    /// Containing folder reference, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<String>,
    /// When ingestion committed the document.
    pub uploaded_at: DateTime<Utc>,
    /// Source-reported modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Number of chunks committed for this document.
    pub chunk_count: usize,
    /// Soft-delete flag; excluded from search when set.
    #[serde(default)]
    pub deleted: bool,
    /// When the document was soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Chunks were persisted without embeddings (embedder failure).
    #[serde(default)]
    pub embed_pending: bool,
    /// Chunking fell back to the character approximation.
    #[serde(default)]
    pub degraded_chunking: bool,
    /// Source-specific provenance.
    pub provenance: Provenance,
}

impl DocumentRecord {
    /// Derives the document id from a content hash.
    #[must_use]
    pub fn id_for_hash(content_hash: &str) -> String {
        content_hash.chars().take(16).collect()
    }

    /// Creates a live document record stamped now.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        content_hash: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        let content_hash = content_hash.into();
        Self {
            id: Self::id_for_hash(&content_hash),
            name: name.into(),
            media_type: media_type.into(),
            content_hash,
            revision_id: None,
            parent_folder: None,
            uploaded_at: Utc::now(),
            modified_at: None,
            chunk_count: 0,
            deleted: false,
            deleted_at: None,
            embed_pending: false,
            degraded_chunking: false,
            provenance,
        }
    }

    /// The source kind, derived from provenance.
    #[must_use]
    pub const fn source(&self) -> SourceKind {
        self.provenance.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_doc(hash: &str) -> DocumentRecord {
        DocumentRecord::new(
            "notes.txt",
            "text/plain",
            hash,
            Provenance::Local {
                path: "/data/notes.txt".to_string(),
            },
        )
    }

    #[test]
    fn test_id_derived_from_hash() {
        let doc = local_doc("abcdef0123456789deadbeefcafebabe");
        assert_eq!(doc.id, "abcdef0123456789");
        assert_eq!(DocumentRecord::id_for_hash("short"), "short");
    }

    #[test]
    fn test_source_from_provenance() {
        assert_eq!(local_doc("aa").source(), SourceKind::Local);

        let doc = DocumentRecord::new(
            "report.pdf",
            "application/pdf",
            "bb",
            Provenance::Drive {
                file_id: "f1".to_string(),
                drive_link: "https://drive.example.com/file/d/f1".to_string(),
            },
        );
        assert_eq!(doc.source(), SourceKind::Drive);
    }

    #[test]
    fn test_provenance_link() {
        let prov = Provenance::Gcs {
            uri: "gs://bucket/key".to_string(),
        };
        assert_eq!(prov.link(), Some("gs://bucket/key"));

        let prov = Provenance::Email {
            subject: "Q3 report".to_string(),
            sender: "a@example.com".to_string(),
            date: "2025-07-01".to_string(),
            message_id: "m-1".to_string(),
        };
        assert_eq!(prov.link(), None);
    }

    #[test]
    fn test_provenance_serde_tag() {
        let prov = Provenance::Local {
            path: "/tmp/x".to_string(),
        };
        let json = serde_json::to_value(&prov).unwrap();
        assert_eq!(json["source"], "local");
        assert_eq!(json["path"], "/tmp/x");

        let back: Provenance = serde_json::from_value(json).unwrap();
        assert_eq!(back, prov);
    }

    #[test]
    fn test_fresh_doc_is_live() {
        let doc = local_doc("cc");
        assert!(!doc.deleted);
        assert!(doc.deleted_at.is_none());
        assert!(!doc.embed_pending);
        assert_eq!(doc.chunk_count, 0);
    }

    #[test]
    fn test_source_kind_wire_names() {
        assert_eq!(SourceKind::Drive.as_str(), "drive");
        assert_eq!(SourceKind::Gcs.as_str(), "gcs");
        assert_eq!(SourceKind::Local.as_str(), "local");
        assert_eq!(SourceKind::Email.as_str(), "email");
    }
}
