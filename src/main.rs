//! Binary entry point: serve the platform API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use synthos_rs::capability::{BuiltinExtractor, FallbackEmbedder};
use synthos_rs::config::Settings;
use synthos_rs::{Capabilities, Host, LocalBlobStore, SqliteDocStore};

/// Multi-agent research and analysis platform.
#[derive(Debug, Parser)]
#[command(name = "synthos-rs", version, about)]
struct Args {
    /// Address to bind the HTTP API on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to the SQLite document store.
    #[arg(long, env = "DB_PATH", default_value = "synthos.db")]
    db: PathBuf,

    /// Root directory for the local blob store.
    #[arg(long, env = "BLOB_ROOT", default_value = "blobs")]
    blob_root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = Settings::from_env();

    let caps = Capabilities {
        store: Arc::new(SqliteDocStore::open(&args.db).context("opening document store")?),
        blobs: Arc::new(LocalBlobStore::new(&args.blob_root).context("opening blob store")?),
        embedder: Arc::new(FallbackEmbedder::new(settings.embed_dimensions)),
        extractor: Arc::new(BuiltinExtractor::new()),
        sampler: build_sampler(&settings),
        folders: None,
        mail: None,
    };

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    let local_addr = listener.local_addr().context("reading bound address")?;
    let base_url = format!("http://{local_addr}");

    let host = Host::new(settings, &base_url, caps).context("wiring host")?;
    let background = host.spawn_background();

    info!(%local_addr, db = %args.db.display(), "serving");
    let app = synthos_rs::api::router(Arc::clone(&host));
    let shutdown_host = Arc::clone(&host);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_host.shutdown().await;
        })
        .await
        .context("serving")?;

    for handle in background {
        handle.abort();
    }
    Ok(())
}

/// The sampler capability: OpenAI-backed when the feature is compiled in,
/// otherwise a stub that rejects sampling until a provider is wired.
#[cfg(feature = "openai")]
fn build_sampler(settings: &Settings) -> Arc<dyn synthos_rs::Sampler> {
    Arc::new(synthos_rs::capability::OpenAiSampler::new(
        settings.model.clone(),
    ))
}

/// The sampler capability: OpenAI-backed when the feature is compiled in,
/// otherwise a stub that rejects sampling until a provider is wired.
#[cfg(not(feature = "openai"))]
fn build_sampler(_settings: &Settings) -> Arc<dyn synthos_rs::Sampler> {
    struct UnconfiguredSampler;

    #[async_trait::async_trait]
    impl synthos_rs::Sampler for UnconfiguredSampler {
        async fn sample(
            &self,
            _input: &synthos_rs::TaskInput,
        ) -> synthos_rs::Result<String> {
            Err(synthos_rs::Error::permanent(
                "no sampler configured (build with the `openai` feature or wire a Sampler)",
            ))
        }
    }

    Arc::new(UnconfiguredSampler)
}
