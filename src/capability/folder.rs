//! Folder-provider capability (remote drives with push notifications).
//!
//! Covers enumeration, download, and change-notification channels for
//! providers that support them. The vendor SDK lives behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Metadata for one remote file or folder entry.
#[derive(Debug, Clone)]
pub struct RemoteFileMeta {
    /// Provider file id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Media type as reported by the provider.
    pub media_type: String,
    /// Provider-reported modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// Cheap vendor checksum, when available (avoids a download for dedupe).
    pub checksum: Option<String>,
    /// Latest revision token, when the provider tracks revisions.
    pub revision_id: Option<String>,
    /// Whether the entry is a folder (descended into, never ingested).
    pub is_folder: bool,
}

impl RemoteFileMeta {
    /// Creates a file entry with the given id, name, and media type.
    #[must_use]
    pub fn file(
        id: impl Into<String>,
        name: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: media_type.into(),
            modified_at: None,
            checksum: None,
            revision_id: None,
            is_folder: false,
        }
    }

    /// Creates a folder entry.
    #[must_use]
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: "application/vnd.folder".to_string(),
            modified_at: None,
            checksum: None,
            revision_id: None,
            is_folder: true,
        }
    }
}

/// A registered push-notification channel.
#[derive(Debug, Clone)]
pub struct ChannelRegistration {
    /// Channel id chosen by the caller.
    pub channel_id: String,
    /// Provider resource id needed to stop the channel.
    pub resource_id: String,
    /// When the channel expires.
    pub expires_at: DateTime<Utc>,
}

/// Remote folder provider with optional push notifications.
#[async_trait]
pub trait FolderSource: Send + Sync {
    /// Lists the direct children of a folder (files and subfolders).
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails.
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteFileMeta>>;

    /// Downloads a file's raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Registers a push-notification channel for a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the registration.
    async fn watch(
        &self,
        folder_id: &str,
        channel_id: &str,
        webhook_url: &str,
        ttl_secs: u64,
    ) -> Result<ChannelRegistration>;

    /// Stops a previously registered channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails.
    async fn stop_watch(&self, channel_id: &str, resource_id: &str) -> Result<()>;

    /// A shareable drive-style link for a file.
    fn file_link(&self, file_id: &str) -> String {
        format!("https://drive.google.com/file/d/{file_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_meta() {
        let meta = RemoteFileMeta::file("f1", "notes.txt", "text/plain");
        assert!(!meta.is_folder);
        assert!(meta.checksum.is_none());
    }

    #[test]
    fn test_folder_meta() {
        let meta = RemoteFileMeta::folder("d1", "reports");
        assert!(meta.is_folder);
    }
}
