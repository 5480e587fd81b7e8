//! HTTP client for worker calls.
//!
//! Every stage call is an HTTP POST with a JSON body to a registered worker
//! URL, bounded by a hard ceiling. Non-2xx responses become the error kind
//! their status class implies; the orchestrator turns any of them into a
//! failed job.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::WORKER_NAMES;
use crate::error::{Error, Result};

/// Hard ceiling on a single worker call.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Worker registry plus the HTTP client used to reach them.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    registry: HashMap<String, String>,
}

impl WorkerClient {
    /// Creates a client over an explicit name-to-base-URL registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(registry: HashMap<String, String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(WORKER_TIMEOUT)
            .build()?;
        Ok(Self { http, registry })
    }

    /// Creates a registry pointing every known worker at one base URL
    /// (single-process deployment), with per-worker overrides applied on
    /// top.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn for_base(base: &str, overrides: &HashMap<String, String>) -> Result<Self> {
        let mut registry: HashMap<String, String> = WORKER_NAMES
            .iter()
            .map(|name| ((*name).to_string(), base.trim_end_matches('/').to_string()))
            .collect();
        for (name, url) in overrides {
            registry.insert(name.clone(), url.trim_end_matches('/').to_string());
        }
        Self::new(registry)
    }

    /// Resolved base URL for a worker, if registered.
    #[must_use]
    pub fn url_for(&self, worker: &str) -> Option<&str> {
        self.registry.get(worker).map(String::as_str)
    }

    /// Calls a worker endpoint and parses the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermanentIo`] for unregistered workers and 4xx
    /// responses, [`Error::TransientIo`] for 5xx/timeouts, and
    /// [`Error::QuotaExceeded`] for 429.
    pub async fn call(&self, worker: &str, endpoint: &str, payload: &Value) -> Result<Value> {
        let base = self
            .registry
            .get(worker)
            .ok_or_else(|| Error::permanent(format!("worker not registered: {worker}")))?;
        let url = format!("{base}{endpoint}");

        info!(worker, endpoint, "calling worker");
        let response = self.http.post(&url).json(payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(worker, %status, body = %body, "worker call failed");
            return Err(match status.as_u16() {
                429 => Error::QuotaExceeded {
                    retry_after_secs: 60,
                },
                code if status.is_server_error() => {
                    Error::transient(format!("{worker}{endpoint} returned {code}: {body}"))
                }
                code => Error::permanent(format!("{worker}{endpoint} returned {code}: {body}")),
            });
        }

        Ok(response.json().await?)
    }
}
