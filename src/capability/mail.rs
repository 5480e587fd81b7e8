//! Mail-inbox capability for attachment ingestion.
//!
//! The poller lists messages matching a query and runs every attachment
//! through the ingestion pipeline with email-header provenance.

use async_trait::async_trait;

use crate::error::Result;

/// One attachment on a message.
#[derive(Debug, Clone)]
pub struct MailAttachment {
    /// Attachment file name.
    pub filename: String,
    /// Attachment media type.
    pub media_type: String,
    /// Decoded attachment bytes.
    pub data: Vec<u8>,
}

/// One inbox message with its headers and attachments.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Provider message id.
    pub id: String,
    /// Subject header.
    pub subject: String,
    /// From header.
    pub sender: String,
    /// Date header.
    pub date: String,
    /// Attachments carried by the message.
    pub attachments: Vec<MailAttachment>,
}

/// Mail provider the inbox poller reads from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Lists messages matching a label/query, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails.
    async fn list_messages(&self, query: &str, max_results: usize) -> Result<Vec<MailMessage>>;
}
