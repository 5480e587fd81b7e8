//! Mail-inbox poller.
//!
//! Lists messages matching a label query and runs every attachment through
//! the ingestion pipeline with email-header provenance (subject, sender,
//! date, message id).

use serde::Serialize;
use tracing::{info, warn};

use crate::capability::MailSource;
use crate::core::Provenance;
use crate::error::Result;
use crate::ingest::{FileMeta, FileOutcome, IngestPipeline};

/// Outcome of one inbox poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailIngestReport {
    /// Messages listed.
    pub messages: usize,
    /// Attachments newly indexed.
    pub attachments_processed: usize,
    /// Attachments skipped as duplicates or unextractable.
    pub attachments_skipped: usize,
}

/// Polls an inbox and ingests matching attachments.
///
/// # Errors
///
/// Returns an error when the mail provider call fails; per-attachment
/// failures are logged and skipped.
pub async fn poll_inbox(
    mail: &dyn MailSource,
    pipeline: &IngestPipeline,
    label: &str,
    max_results: usize,
) -> Result<EmailIngestReport> {
    let query = format!("label:{label} has:attachment");
    let messages = mail.list_messages(&query, max_results).await?;
    info!(label, messages = messages.len(), "polling inbox");

    let mut report = EmailIngestReport {
        messages: messages.len(),
        ..Default::default()
    };

    for message in &messages {
        for attachment in &message.attachments {
            let meta = FileMeta::new(
                attachment.filename.clone(),
                attachment.media_type.clone(),
                Provenance::Email {
                    subject: message.subject.clone(),
                    sender: message.sender.clone(),
                    date: message.date.clone(),
                    message_id: message.id.clone(),
                },
            );

            match pipeline.ingest_content(&attachment.data, meta).await {
                Ok(FileOutcome::Ingested { chunks, .. }) => {
                    info!(
                        attachment = %attachment.filename,
                        subject = %message.subject,
                        chunks,
                        "indexed email attachment"
                    );
                    report.attachments_processed += 1;
                }
                Ok(_) => report.attachments_skipped += 1,
                Err(e) => {
                    warn!(
                        attachment = %attachment.filename,
                        message = %message.id,
                        error = %e,
                        "failed to ingest attachment"
                    );
                    report.attachments_skipped += 1;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        BuiltinExtractor, DEFAULT_DIMENSIONS, FallbackEmbedder, MailAttachment, MailMessage,
    };
    use crate::core::SourceKind;
    use crate::store::{DocStore, LocalBlobStore, SqliteDocStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FakeInbox(Vec<MailMessage>);

    #[async_trait]
    impl MailSource for FakeInbox {
        async fn list_messages(
            &self,
            _query: &str,
            max_results: usize,
        ) -> Result<Vec<MailMessage>> {
            Ok(self.0.iter().take(max_results).cloned().collect())
        }
    }

    fn pipeline() -> (Arc<IngestPipeline>, Arc<SqliteDocStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&store) as Arc<dyn DocStore>,
            Arc::new(LocalBlobStore::new(dir.path()).unwrap()),
            Arc::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)),
            Arc::new(BuiltinExtractor::new()),
            1000,
        ));
        (pipeline, store, dir)
    }

    fn message(id: &str, body: &[u8]) -> MailMessage {
        MailMessage {
            id: id.to_string(),
            subject: "Q3 figures".to_string(),
            sender: "cfo@example.com".to_string(),
            date: "Tue, 1 Jul 2025 10:00:00 +0000".to_string(),
            attachments: vec![MailAttachment {
                filename: "figures.txt".to_string(),
                media_type: "text/plain".to_string(),
                data: body.to_vec(),
            }],
        }
    }

    #[tokio::test]
    async fn test_attachments_indexed_with_email_provenance() {
        let (pipeline, store, _dir) = pipeline();
        let inbox = FakeInbox(vec![message("m-1", b"quarterly revenue grew")]);

        let report = poll_inbox(&inbox, &pipeline, "INBOX", 100).await.unwrap();
        assert_eq!(report.messages, 1);
        assert_eq!(report.attachments_processed, 1);

        let docs = store.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source(), SourceKind::Email);
        match &docs[0].provenance {
            Provenance::Email {
                subject, message_id, ..
            } => {
                assert_eq!(subject, "Q3 figures");
                assert_eq!(message_id, "m-1");
            }
            other => panic!("wrong provenance: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_attachment_skipped() {
        let (pipeline, store, _dir) = pipeline();
        let inbox = FakeInbox(vec![
            message("m-1", b"same bytes"),
            message("m-2", b"same bytes"),
        ]);

        let report = poll_inbox(&inbox, &pipeline, "INBOX", 100).await.unwrap();
        assert_eq!(report.attachments_processed, 1);
        assert_eq!(report.attachments_skipped, 1);
        assert_eq!(store.list_documents().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_results_respected() {
        let (pipeline, _store, _dir) = pipeline();
        let inbox = FakeInbox(vec![
            message("m-1", b"one"),
            message("m-2", b"two"),
            message("m-3", b"three"),
        ]);

        let report = poll_inbox(&inbox, &pipeline, "INBOX", 2).await.unwrap();
        assert_eq!(report.messages, 2);
    }
}
