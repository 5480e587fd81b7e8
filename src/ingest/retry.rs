//! Deferred retries with exponential backoff and jitter.
//!
//! Per-file ingestion errors enqueue a retry task carrying an attempt
//! counter; the consumer sleeps the backoff delay before each re-attempt. A
//! file that exhausts its attempts becomes a persisted `FailedIngest`.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

/// Default attempts before a file is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff schedule with random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Creates a schedule with the given base delay, growth factor, and cap.
    #[must_use]
    pub const fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max }
    }

    /// Delay before the given attempt (1-based), without jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1).min(16) as i32);
        self.base.mul_f64(exp).min(self.max)
    }

    /// Delay with up to 50% random jitter added.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        base.mul_f64(1.0 + jitter).min(self.max)
    }
}

/// One deferred retry task.
#[derive(Debug, Clone)]
pub struct RetryTask<T> {
    /// The work item to re-attempt.
    pub item: T,
    /// Attempts already consumed.
    pub attempts: u32,
    /// Last error message.
    pub last_error: String,
}

/// FIFO queue of deferred retry tasks.
#[derive(Debug)]
pub struct RetryQueue<T> {
    tasks: VecDeque<RetryTask<T>>,
    max_attempts: u32,
}

impl<T> RetryQueue<T> {
    /// Creates a queue abandoning items after `max_attempts`.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            tasks: VecDeque::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Enqueues a failed item for another attempt.
    ///
    /// Returns `false` (and drops the task) when the item already consumed
    /// all its attempts; the caller persists the terminal failure.
    pub fn push_failed(&mut self, item: T, attempts: u32, error: impl Into<String>) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        self.tasks.push_back(RetryTask {
            item,
            attempts,
            last_error: error.into(),
        });
        true
    }

    /// Pops the next task to retry.
    pub fn pop(&mut self) -> Option<RetryTask<T>> {
        self.tasks.pop_front()
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Maximum attempts before abandonment.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
