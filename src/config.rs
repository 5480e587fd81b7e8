//! Environment-driven configuration.
//!
//! Every knob is an environment variable with a documented default, so the
//! process can run unconfigured in local development and be tuned per
//! deployment without code changes.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Default grace period before soft-deleted documents are hard-deleted.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Default token-bucket size for ingestion entry points (per minute).
pub const DEFAULT_QUOTA_PER_MINUTE: u32 = 1000;

/// Default winning margin for the voting engine.
pub const DEFAULT_MAKER_K: u32 = 3;

/// Default round budget for the voting engine.
pub const DEFAULT_MAKER_MAX_ROUNDS: u32 = 40;

/// Worker names the orchestrator can route to.
pub const WORKER_NAMES: &[&str] = &[
    "researcher",
    "verifier",
    "transformer",
    "exporter",
    "memory",
];

/// Runtime settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Days a soft-deleted document survives before the sweep removes it.
    pub retention_days: i64,
    /// Ingestion token-bucket size per minute.
    pub quota_per_minute: u32,
    /// Whether search fuses the lexical arm (false = vector arm only).
    pub hybrid_search: bool,
    /// Winning margin for first-to-ahead-by-k voting.
    pub maker_k: u32,
    /// Round budget for first-to-ahead-by-k voting.
    pub maker_max_rounds: u32,
    /// Raw-output length cap; `None` derives it from the model hint.
    pub maker_max_raw_len: Option<usize>,
    /// Default model hint passed to samplers.
    pub model: String,
    /// Worker name to base-URL registry.
    pub worker_urls: HashMap<String, String>,
    /// Publicly reachable address for push-notification webhooks.
    pub webhook_url: String,
    /// Dimensions for the built-in fallback embedder.
    pub embed_dimensions: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            quota_per_minute: DEFAULT_QUOTA_PER_MINUTE,
            hybrid_search: true,
            maker_k: DEFAULT_MAKER_K,
            maker_max_rounds: DEFAULT_MAKER_MAX_ROUNDS,
            maker_max_raw_len: None,
            model: String::new(),
            worker_urls: HashMap::new(),
            webhook_url: "http://localhost:8080/webhook/drive".to_string(),
            embed_dimensions: 384,
        }
    }
}

impl Settings {
    /// Resolves settings from the process environment.
    ///
    /// Recognized variables and defaults:
    ///
    /// | Variable | Default | Effect |
    /// |---|---|---|
    /// | `SOFT_DELETE_RETENTION_DAYS` | 30 | grace period before hard delete |
    /// | `QUOTA_LIMIT_PER_MINUTE` | 1000 | ingestion token-bucket size |
    /// | `ENABLE_HYBRID_SEARCH` | true | false = vector arm only |
    /// | `MAKER_K` | 3 | voting margin |
    /// | `MAKER_MAX_ROUNDS` | 40 | voting round budget |
    /// | `MAKER_MAX_TOKENS` | auto | raw-output cap (auto: by model hint) |
    /// | `LLM_MODEL` | empty | model hint for samplers |
    /// | `WEBHOOK_URL` | localhost | push-notification address |
    /// | `EMBED_DIMENSIONS` | 384 | fallback embedder dimensions |
    /// | `<NAME>_WORKER_URL` | unset | per-worker endpoint override |
    #[must_use]
    pub fn from_env() -> Self {
        let mut worker_urls = HashMap::new();
        for name in WORKER_NAMES {
            let var = format!("{}_WORKER_URL", name.to_uppercase());
            if let Ok(url) = env::var(&var) {
                worker_urls.insert((*name).to_string(), url);
            }
        }

        Self {
            retention_days: env_parse("SOFT_DELETE_RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
            quota_per_minute: env_parse("QUOTA_LIMIT_PER_MINUTE", DEFAULT_QUOTA_PER_MINUTE),
            hybrid_search: env_flag("ENABLE_HYBRID_SEARCH", true),
            maker_k: env_parse("MAKER_K", DEFAULT_MAKER_K).max(1),
            maker_max_rounds: env_parse("MAKER_MAX_ROUNDS", DEFAULT_MAKER_MAX_ROUNDS).max(1),
            maker_max_raw_len: env::var("MAKER_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok()),
            model: env::var("LLM_MODEL").unwrap_or_default(),
            worker_urls,
            webhook_url: env::var("WEBHOOK_URL")
                .unwrap_or_else(|_| "http://localhost:8080/webhook/drive".to_string()),
            embed_dimensions: env_parse("EMBED_DIMENSIONS", 384),
        }
    }

    /// Resolves a worker endpoint, falling back to `base` when no explicit
    /// URL is registered for the name.
    #[must_use]
    pub fn worker_url(&self, name: &str, base: &str) -> String {
        self.worker_urls
            .get(name)
            .cloned()
            .unwrap_or_else(|| base.to_string())
    }
}

/// Parses an env var, falling back to `default` when absent or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses a boolean env flag ("true"/"false", case-insensitive).
fn env_flag(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| v.eq_ignore_ascii_case("true"))
}
