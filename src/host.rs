//! Process wiring root.
//!
//! One [`Host`] owns the capability graph: the document and blob stores,
//! the ingestion pipeline, the retriever, the orchestrator, the worker
//! façades, and the watch registries. Background loops (dispatcher,
//! retention sweep, channel renewal) are supervised tasks started from here
//! and stopped through one shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::capability::{Embedder, Extractor, FolderSource, MailSource, Sampler};
use crate::config::Settings;
use crate::error::Result;
use crate::ingest::{IngestPipeline, sweep};
use crate::jobs::{Orchestrator, WorkerClient, run_dispatcher};
use crate::maker::{CancelToken, MakerConfig};
use crate::search::Retriever;
use crate::store::{BlobStore, DocStore};
use crate::watch::{FileShareManager, RENEWAL_CHECK_INTERVAL, WatchManager};
use crate::workers::{Exporter, Researcher, Transformer, Verifier};

/// External capabilities handed to [`Host::new`].
pub struct Capabilities {
    /// Document database.
    pub store: Arc<dyn DocStore>,
    /// Object storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Embedding service.
    pub embedder: Arc<dyn Embedder>,
    /// Text extraction service.
    pub extractor: Arc<dyn Extractor>,
    /// Language-model sampler.
    pub sampler: Arc<dyn Sampler>,
    /// Remote folder provider, when configured.
    pub folders: Option<Arc<dyn FolderSource>>,
    /// Mail provider, when configured.
    pub mail: Option<Arc<dyn MailSource>>,
}

/// The wired process.
pub struct Host {
    /// Resolved runtime settings.
    pub settings: Settings,
    /// Document database.
    pub store: Arc<dyn DocStore>,
    /// Object storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Ingestion pipeline.
    pub pipeline: Arc<IngestPipeline>,
    /// Hybrid retriever.
    pub retriever: Arc<Retriever>,
    /// Job orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Push-notification channel registry.
    pub watches: Arc<WatchManager>,
    /// Local share pollers.
    pub fileshares: Arc<FileShareManager>,
    /// Remote folder provider, when configured.
    pub folders: Option<Arc<dyn FolderSource>>,
    /// Mail provider, when configured.
    pub mail: Option<Arc<dyn MailSource>>,
    /// Claim verification worker.
    pub verifier: Verifier,
    /// Data transformation worker.
    pub transformer: Transformer,
    /// Export worker.
    pub exporter: Exporter,
    /// Research worker.
    pub researcher: Researcher,
    /// Process-wide cancellation (flips on shutdown).
    pub cancel: CancelToken,
    shutdown: watch::Sender<bool>,
}

impl Host {
    /// Wires a host. `base_url` is where this process's own worker routes
    /// are reachable; the registry defaults every worker to it.
    ///
    /// # Errors
    ///
    /// Returns an error if storage initialization or client construction
    /// fails.
    pub fn new(settings: Settings, base_url: &str, caps: Capabilities) -> Result<Arc<Self>> {
        caps.store.init()?;

        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&caps.store),
            Arc::clone(&caps.blobs),
            Arc::clone(&caps.embedder),
            Arc::clone(&caps.extractor),
            settings.quota_per_minute,
        ));
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&caps.store),
            Arc::clone(&caps.embedder),
            settings.hybrid_search,
        ));

        let client = WorkerClient::for_base(base_url, &settings.worker_urls)?;
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&caps.store),
            client,
            Arc::clone(&caps.blobs),
            Arc::clone(&pipeline),
        ));

        let watches = Arc::new(WatchManager::new(
            caps.folders.clone(),
            Arc::clone(&pipeline),
            settings.webhook_url.clone(),
        ));
        let fileshares = Arc::new(FileShareManager::new(Arc::clone(&pipeline)));

        let cancel = CancelToken::new();
        let maker = MakerConfig {
            k: settings.maker_k,
            max_rounds: settings.maker_max_rounds,
            max_raw_len: settings.maker_max_raw_len,
        };
        let verifier = Verifier::new(
            Arc::clone(&caps.sampler),
            maker.clone(),
            &settings.model,
            cancel.clone(),
        );
        let transformer = Transformer::new(
            Arc::clone(&caps.sampler),
            Arc::clone(&caps.blobs),
            maker.clone(),
            &settings.model,
            cancel.clone(),
        );
        let exporter = Exporter::new(
            Arc::clone(&caps.sampler),
            Arc::clone(&caps.blobs),
            maker.clone(),
            &settings.model,
            cancel.clone(),
        );
        let researcher = Researcher::new(
            Arc::clone(&caps.sampler),
            Arc::clone(&retriever),
            maker,
            &settings.model,
            cancel.clone(),
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            settings,
            store: caps.store,
            blobs: caps.blobs,
            pipeline,
            retriever,
            orchestrator,
            watches,
            fileshares,
            folders: caps.folders,
            mail: caps.mail,
            verifier,
            transformer,
            exporter,
            researcher,
            cancel,
            shutdown,
        }))
    }

    /// Starts the supervised background loops: job dispatcher, retention
    /// sweep, and watch-channel renewal.
    #[must_use]
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let handles = vec![
            tokio::spawn(run_dispatcher(
                Arc::clone(&self.orchestrator),
                self.shutdown.subscribe(),
            )),
            tokio::spawn(sweep::run_retention_sweep(
                Arc::clone(&self.store),
                self.settings.retention_days,
                sweep::SWEEP_INTERVAL,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(
                Arc::clone(&self.watches)
                    .run_renewal_loop(RENEWAL_CHECK_INTERVAL, self.shutdown.subscribe()),
            ),
        ];
        info!(tasks = handles.len(), "background tasks started");
        handles
    }

    /// A receiver that observes the shutdown signal.
    #[must_use]
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signals every supervised loop to stop, cancels in-flight voting, and
    /// stops registered watch channels.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        self.cancel.cancel();
        let stopped = self.watches.stop_all().await;
        self.fileshares.stop_all();
        info!(channels_stopped = stopped, "shutdown complete");
    }
}
