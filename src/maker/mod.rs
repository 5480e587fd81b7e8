//! MAKER voting engine.
//!
//! Turns a non-deterministic [`Sampler`] into a reliable producer of a
//! validated structured result: sample repeatedly, discard pathological
//! outputs (red flags), bucket the survivors by canonical serialization, and
//! return the first candidate ahead of every rival by at least `k` votes.
//!
//! Independent correct samples accrue on the same canonical bucket while
//! errors diffuse across many buckets, so against a sampler that is right
//! more than half the time the k-gap criterion is reached quickly. Red
//! flagging removes the heavy-tailed failures that would otherwise cluster
//! on a common but wrong serialization.

pub mod canonical;
pub mod parser;

pub use canonical::{canonical_json, to_canonical_string};
pub use parser::{last_json_object, parse_last_json};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::capability::{Sampler, TaskInput};
use crate::error::{Error, Result};

/// Default winning margin.
pub const DEFAULT_K: u32 = 3;

/// Default round budget.
pub const DEFAULT_MAX_ROUNDS: u32 = 40;

/// Raw-output cap for long-context / premium model hints.
pub const RAW_CAP_PREMIUM: usize = 1200;

/// Raw-output cap for everything else.
pub const RAW_CAP_DEFAULT: usize = 750;

/// Model-hint substrings that select the premium raw cap.
const PREMIUM_MARKERS: &[&str] = &["o1", "claude-3", "grok", "sonnet", "opus", "haiku"];

/// Cooperative cancellation flag threaded through long-running work.
///
/// Cancellation never interrupts in-flight I/O; callers poll between
/// suspension points and shut down cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Configuration for one voting invocation.
#[derive(Debug, Clone)]
pub struct MakerConfig {
    /// Required winning margin over every rival.
    pub k: u32,
    /// Maximum sampler rounds before giving up.
    pub max_rounds: u32,
    /// Raw-output length cap; `None` derives it from the model hint.
    pub max_raw_len: Option<usize>,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_raw_len: None,
        }
    }
}

impl MakerConfig {
    /// Creates a config with the given margin.
    #[must_use]
    pub const fn with_k(k: u32) -> Self {
        Self {
            k,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_raw_len: None,
        }
    }

    /// Sets the round budget.
    #[must_use]
    pub const fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets an explicit raw-output cap.
    #[must_use]
    pub const fn max_raw_len(mut self, cap: usize) -> Self {
        self.max_raw_len = Some(cap);
        self
    }
}

/// Derives the raw-output cap from a model hint.
#[must_use]
pub fn raw_cap_for_model(model: &str) -> usize {
    let model = model.to_lowercase();
    if PREMIUM_MARKERS.iter().any(|m| model.contains(m)) {
        RAW_CAP_PREMIUM
    } else {
        RAW_CAP_DEFAULT
    }
}

/// Runs the first-to-ahead-by-k voting loop.
///
/// Rounds are sequential. Each round samples once, red-flags oversized or
/// unparseable output, canonicalizes the survivor, and votes. The call
/// returns as soon as the just-voted serialization's count `c` satisfies
/// `c >= m + k`, where `m` is the maximum count among all other
/// serializations (0 when there are none).
///
/// # Errors
///
/// Returns [`Error::NoConvergence`] when the round budget is exhausted or
/// cancellation is observed; unrecoverable sampler errors propagate.
/// Transient sampler failures count as red-flagged rounds.
pub async fn first_to_ahead_by_k<T, P>(
    input: &TaskInput,
    sampler: &dyn Sampler,
    parser: P,
    config: &MakerConfig,
    cancel: &CancelToken,
) -> Result<T>
where
    T: Serialize,
    P: Fn(&str) -> Result<T>,
{
    let raw_cap = config
        .max_raw_len
        .unwrap_or_else(|| raw_cap_for_model(&input.model));

    let mut votes: HashMap<String, u32> = HashMap::new();
    let mut red_flags = 0u32;

    for round in 1..=config.max_rounds {
        if cancel.is_cancelled() {
            return Err(Error::NoConvergence {
                rounds: round - 1,
                k: config.k,
            });
        }

        let raw = match sampler.sample(input).await {
            Ok(raw) => raw,
            Err(e) if e.is_retryable() => {
                red_flags += 1;
                debug!(round, error = %e, "sampler round failed, discarding");
                continue;
            }
            Err(e) => return Err(e),
        };

        if raw.len() > raw_cap {
            red_flags += 1;
            debug!(round, len = raw.len(), cap = raw_cap, "red-flagged oversized output");
            continue;
        }

        let parsed = match parser(&raw) {
            Ok(parsed) => parsed,
            Err(Error::RedFlag { reason }) => {
                red_flags += 1;
                debug!(round, %reason, "red-flagged output");
                continue;
            }
            Err(e) => return Err(e),
        };

        let serialized = to_canonical_string(&parsed)?;
        let count = {
            let entry = votes.entry(serialized.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let rival_max = votes
            .iter()
            .filter(|(s, _)| **s != serialized)
            .map(|(_, c)| *c)
            .max()
            .unwrap_or(0);

        if count >= rival_max + config.k {
            info!(
                round,
                votes = count,
                red_flags,
                k = config.k,
                model = %input.model,
                "winner decided"
            );
            return Ok(parsed);
        }
    }

    Err(Error::NoConvergence {
        rounds: config.max_rounds,
        k: config.k,
    })
}
