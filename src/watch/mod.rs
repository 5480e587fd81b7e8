//! Change-detection watchers.
//!
//! Three variants feed the ingestion pipeline: provider push-notification
//! channels (registered with a webhook and renewed before expiry), a
//! mail-inbox poller, and local-filesystem pollers. All are supervised
//! tasks with explicit start/stop, safe to shut down mid-tick.

pub mod email;
pub mod fileshare;

pub use email::{EmailIngestReport, poll_inbox};
pub use fileshare::{FileShareManager, FileShareWatch, StartOutcome};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capability::FolderSource;
use crate::error::{Error, Result};
use crate::ingest::{IngestPipeline, IngestReport};

/// How often the renewal loop checks channel expiries.
pub const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Default channel TTL in hours.
pub const DEFAULT_CHANNEL_TTL_HOURS: u64 = 24;

/// One registered push-notification channel.
#[derive(Debug, Clone, Serialize)]
pub struct WatchChannel {
    /// Channel id (also the webhook correlation key).
    pub channel_id: String,
    /// Watched folder.
    pub folder_id: String,
    /// Provider resource id, needed to stop the channel.
    pub resource_id: String,
    /// When the registration expires.
    pub expires_at: DateTime<Utc>,
    /// Registered TTL in seconds.
    pub ttl_secs: u64,
}

/// Registry of push-notification channels with background renewal.
pub struct WatchManager {
    folders: Option<Arc<dyn FolderSource>>,
    pipeline: Arc<IngestPipeline>,
    webhook_url: String,
    channels: RwLock<HashMap<String, WatchChannel>>,
}

impl WatchManager {
    /// Creates a manager; `folders` is `None` when no provider is wired.
    #[must_use]
    pub fn new(
        folders: Option<Arc<dyn FolderSource>>,
        pipeline: Arc<IngestPipeline>,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            folders,
            pipeline,
            webhook_url: webhook_url.into(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn folders(&self) -> Result<&Arc<dyn FolderSource>> {
        self.folders
            .as_ref()
            .ok_or_else(|| Error::transient("folder provider not configured"))
    }

    fn read_channels(&self) -> Result<Vec<WatchChannel>> {
        Ok(self
            .channels
            .read()
            .map_err(|_| Error::invariant("watch registry poisoned"))?
            .values()
            .cloned()
            .collect())
    }

    /// Registers a push-notification channel for a folder.
    ///
    /// # Errors
    ///
    /// Returns an error when no provider is configured or registration
    /// fails.
    pub async fn start_channel(&self, folder_id: &str, ttl_hours: u64) -> Result<WatchChannel> {
        let folders = self.folders()?;
        let channel_id = Uuid::new_v4().to_string();
        let ttl_secs = ttl_hours.max(1) * 3600;

        let registration = folders
            .watch(folder_id, &channel_id, &self.webhook_url, ttl_secs)
            .await?;

        let channel = WatchChannel {
            channel_id: channel_id.clone(),
            folder_id: folder_id.to_string(),
            resource_id: registration.resource_id,
            expires_at: registration.expires_at,
            ttl_secs,
        };

        self.channels
            .write()
            .map_err(|_| Error::invariant("watch registry poisoned"))?
            .insert(channel_id.clone(), channel.clone());

        info!(folder = %folder_id, channel = %channel_id, "watch channel started");
        Ok(channel)
    }

    /// Resolves a webhook notification to the folder to re-enumerate.
    ///
    /// Returns `None` for unknown channels and initial `sync` messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn handle_notification(
        &self,
        channel_id: &str,
        resource_state: &str,
    ) -> Result<Option<String>> {
        if resource_state == "sync" {
            return Ok(None);
        }
        Ok(self
            .channels
            .read()
            .map_err(|_| Error::invariant("watch registry poisoned"))?
            .get(channel_id)
            .map(|c| c.folder_id.clone()))
    }

    /// Re-enumerates a folder after a change notification.
    ///
    /// # Errors
    ///
    /// Returns an error when no provider is configured or ingestion fails.
    pub async fn reingest_folder(&self, folder_id: &str) -> Result<IngestReport> {
        let folders = self.folders()?;
        info!(folder = %folder_id, "change detected, re-enumerating folder");
        self.pipeline
            .ingest_folder(folders.as_ref(), folder_id, true)
            .await
    }

    /// Renews channels within half their TTL of expiry.
    ///
    /// Returns the number of channels renewed.
    ///
    /// # Errors
    ///
    /// Returns an error when no provider is configured; individual renewal
    /// failures are logged and skipped.
    pub async fn renew_due(&self) -> Result<usize> {
        let folders = self.folders()?;
        let now = Utc::now();

        let due: Vec<WatchChannel> = self
            .read_channels()?
            .into_iter()
            .filter(|channel| {
                let remaining = (channel.expires_at - now).num_seconds().max(0);
                #[allow(clippy::cast_possible_wrap)]
                let half_ttl = (channel.ttl_secs / 2) as i64;
                remaining < half_ttl
            })
            .collect();

        let mut renewed = 0usize;
        for old in due {
            if let Err(e) = folders.stop_watch(&old.channel_id, &old.resource_id).await {
                warn!(channel = %old.channel_id, error = %e, "failed to stop expiring channel");
            }
            match self
                .start_channel(&old.folder_id, old.ttl_secs / 3600)
                .await
            {
                Ok(_) => {
                    self.channels
                        .write()
                        .map_err(|_| Error::invariant("watch registry poisoned"))?
                        .remove(&old.channel_id);
                    renewed += 1;
                    info!(folder = %old.folder_id, "watch channel renewed");
                }
                Err(e) => {
                    error!(channel = %old.channel_id, error = %e, "failed to renew channel");
                }
            }
        }
        Ok(renewed)
    }

    /// Stops every channel (shutdown path). Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let Ok(channels) = self.read_channels() else {
            return 0;
        };
        let Some(folders) = self.folders.as_ref() else {
            return 0;
        };

        let mut stopped = 0usize;
        for channel in channels {
            match folders
                .stop_watch(&channel.channel_id, &channel.resource_id)
                .await
            {
                Ok(()) => stopped += 1,
                Err(e) => warn!(channel = %channel.channel_id, error = %e, "stop failed"),
            }
        }
        if let Ok(mut map) = self.channels.write() {
            map.clear();
        }
        stopped
    }

    /// Active channels, for observability endpoints.
    #[must_use]
    pub fn channels(&self) -> Vec<WatchChannel> {
        self.read_channels().unwrap_or_default()
    }

    /// Supervised renewal loop; exits when the shutdown signal flips.
    pub async fn run_renewal_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.folders.is_none() {
                        continue;
                    }
                    match self.renew_due().await {
                        Ok(0) => {}
                        Ok(renewed) => info!(renewed, "renewal pass complete"),
                        Err(e) => error!(error = %e, "renewal pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        BuiltinExtractor, ChannelRegistration, DEFAULT_DIMENSIONS, FallbackEmbedder,
        RemoteFileMeta,
    };
    use crate::store::{DocStore, LocalBlobStore, SqliteDocStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory folder provider recording watch/stop calls.
    struct FakeFolders {
        ttl_secs_granted: u64,
        watches: Mutex<Vec<String>>,
        stops: Mutex<Vec<String>>,
    }

    impl FakeFolders {
        fn new(ttl_secs_granted: u64) -> Self {
            Self {
                ttl_secs_granted,
                watches: Mutex::new(Vec::new()),
                stops: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FolderSource for FakeFolders {
        async fn list_folder(&self, _folder_id: &str) -> Result<Vec<RemoteFileMeta>> {
            Ok(vec![])
        }

        async fn download(&self, _file_id: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }

        async fn watch(
            &self,
            folder_id: &str,
            channel_id: &str,
            _webhook_url: &str,
            _ttl_secs: u64,
        ) -> Result<ChannelRegistration> {
            self.watches.lock().unwrap().push(folder_id.to_string());
            #[allow(clippy::cast_possible_wrap)]
            let expires_at = Utc::now() + chrono::Duration::seconds(self.ttl_secs_granted as i64);
            Ok(ChannelRegistration {
                channel_id: channel_id.to_string(),
                resource_id: format!("res-{channel_id}"),
                expires_at,
            })
        }

        async fn stop_watch(&self, channel_id: &str, _resource_id: &str) -> Result<()> {
            self.stops.lock().unwrap().push(channel_id.to_string());
            Ok(())
        }
    }

    fn pipeline() -> (Arc<IngestPipeline>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let pipeline = Arc::new(IngestPipeline::new(
            store,
            Arc::new(LocalBlobStore::new(dir.path()).unwrap()),
            Arc::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)),
            Arc::new(BuiltinExtractor::new()),
            1000,
        ));
        (pipeline, dir)
    }

    #[tokio::test]
    async fn test_start_and_resolve_notification() {
        let (pipeline, _dir) = pipeline();
        let folders = Arc::new(FakeFolders::new(24 * 3600));
        let manager = WatchManager::new(Some(folders), pipeline, "http://localhost/webhook");

        let channel = manager.start_channel("folder-1", 24).await.unwrap();
        assert_eq!(channel.folder_id, "folder-1");

        // Initial sync messages are ignored.
        assert!(
            manager
                .handle_notification(&channel.channel_id, "sync")
                .unwrap()
                .is_none()
        );
        assert_eq!(
            manager
                .handle_notification(&channel.channel_id, "update")
                .unwrap()
                .as_deref(),
            Some("folder-1")
        );
        assert!(
            manager
                .handle_notification("unknown-channel", "update")
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_no_provider_is_transient() {
        let (pipeline, _dir) = pipeline();
        let manager = WatchManager::new(None, pipeline, "http://localhost/webhook");
        let err = manager.start_channel("f", 24).await.unwrap_err();
        assert!(matches!(err, Error::TransientIo { .. }));
    }

    #[tokio::test]
    async fn test_renew_due_replaces_expiring_channels() {
        let (pipeline, _dir) = pipeline();
        // Provider grants only one hour on a 24h request: immediately due.
        let folders = Arc::new(FakeFolders::new(3600));
        let manager = WatchManager::new(
            Some(Arc::clone(&folders) as Arc<dyn FolderSource>),
            pipeline,
            "http://localhost/webhook",
        );

        let old = manager.start_channel("folder-1", 24).await.unwrap();
        let renewed = manager.renew_due().await.unwrap();
        assert_eq!(renewed, 1);

        let channels = manager.channels();
        assert_eq!(channels.len(), 1);
        assert_ne!(channels[0].channel_id, old.channel_id);
        assert!(folders.stops.lock().unwrap().contains(&old.channel_id));
    }

    #[tokio::test]
    async fn test_fresh_channel_not_renewed() {
        let (pipeline, _dir) = pipeline();
        let folders = Arc::new(FakeFolders::new(24 * 3600));
        let manager = WatchManager::new(Some(folders), pipeline, "http://localhost/webhook");

        manager.start_channel("folder-1", 24).await.unwrap();
        assert_eq!(manager.renew_due().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let (pipeline, _dir) = pipeline();
        let folders = Arc::new(FakeFolders::new(24 * 3600));
        let manager = WatchManager::new(
            Some(Arc::clone(&folders) as Arc<dyn FolderSource>),
            pipeline,
            "http://localhost/webhook",
        );

        manager.start_channel("a", 24).await.unwrap();
        manager.start_channel("b", 24).await.unwrap();

        assert_eq!(manager.stop_all().await, 2);
        assert!(manager.channels().is_empty());
    }
}
