//! Error types for platform operations.
//!
//! All fallible operations in the crate share a single tagged error sum.
//! Each variant carries a fixed propagation rule: the MAKER engine absorbs
//! [`Error::RedFlag`] internally, ingestion absorbs [`Error::ExtractionFailed`]
//! per file, and the job orchestrator converts everything else at stage level
//! into a failed job with the error recorded in the job logs.

use thiserror::Error;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error sum for all platform operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A single sampler output was pathological (oversized, unparseable, or
    /// schema-invalid). Swallowed by the voting loop; the round is discarded.
    #[error("red flag: {reason}")]
    RedFlag {
        /// Why the output was discarded.
        reason: String,
    },

    /// The voting loop exhausted its round budget without a decisive winner.
    #[error("no convergence after {rounds} rounds (k={k})")]
    NoConvergence {
        /// Rounds consumed before giving up.
        rounds: u32,
        /// Required winning margin.
        k: u32,
    },

    /// Text extraction failed or the media type is unsupported. Logged and
    /// the file skipped; never retried.
    #[error("extraction failed for {media_type}: {reason}")]
    ExtractionFailed {
        /// Media type of the offending file.
        media_type: String,
        /// Extractor failure detail.
        reason: String,
    },

    /// Transient I/O failure (HTTP 5xx, timeout, embedder hiccup). Retried
    /// with exponential backoff.
    #[error("transient I/O error: {reason}")]
    TransientIo {
        /// Failure detail.
        reason: String,
    },

    /// Permanent I/O failure (HTTP 4xx except 429, auth, not-found). Never
    /// retried.
    #[error("permanent I/O error: {reason}")]
    PermanentIo {
        /// Failure detail.
        reason: String,
    },

    /// A rate limiter or upstream quota rejected the request.
    #[error("quota exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// Cancellation was observed; the operation shut down cleanly.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal contract breach. Fatal, surfaced, never retried.
    #[error("invariant violated: {message}")]
    Invariant {
        /// Description of the broken contract.
        message: String,
    },
}

impl Error {
    /// Builds a red flag with the given reason.
    pub fn red_flag(reason: impl Into<String>) -> Self {
        Self::RedFlag {
            reason: reason.into(),
        }
    }

    /// Builds a transient I/O error with the given reason.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientIo {
            reason: reason.into(),
        }
    }

    /// Builds a permanent I/O error with the given reason.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentIo {
            reason: reason.into(),
        }
    }

    /// Builds an invariant violation with the given message.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::QuotaExceeded { .. })
    }

    /// HTTP status code for the API boundary.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::RedFlag { .. } | Self::PermanentIo { .. } => 400,
            Self::QuotaExceeded { .. } => 429,
            Self::Cancelled => 409,
            Self::TransientIo { .. } => 503,
            Self::NoConvergence { .. } | Self::ExtractionFailed { .. } | Self::Invariant { .. } => {
                500
            }
        }
    }

    /// Short machine-readable tag recorded in job logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RedFlag { .. } => "red_flag",
            Self::NoConvergence { .. } => "no_convergence",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::TransientIo { .. } => "transient_io",
            Self::PermanentIo { .. } => "permanent_io",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Cancelled => "cancelled",
            Self::Invariant { .. } => "invariant",
        }
    }
}

// Conversions from library errors. Storage and serialization failures are
// contract breaches from the platform's point of view; plain I/O is
// transient and HTTP errors split on their status class.

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::PermanentIo {
                    reason: err.to_string(),
                }
            }
            _ => Self::TransientIo {
                reason: err.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Invariant {
            message: format!("docstore: {err}"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Invariant {
            message: format!("serialization: {err}"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::TransientIo {
                reason: err.to_string(),
            };
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 => Self::QuotaExceeded {
                retry_after_secs: 60,
            },
            Some(status) if status.is_server_error() => Self::TransientIo {
                reason: err.to_string(),
            },
            Some(_) => Self::PermanentIo {
                reason: err.to_string(),
            },
            None => Self::TransientIo {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::red_flag("too long");
        assert_eq!(err.to_string(), "red flag: too long");

        let err = Error::NoConvergence { rounds: 40, k: 3 };
        assert_eq!(err.to_string(), "no convergence after 40 rounds (k=3)");

        let err = Error::ExtractionFailed {
            media_type: "application/pdf".to_string(),
            reason: "no extractor".to_string(),
        };
        assert!(err.to_string().contains("application/pdf"));

        let err = Error::QuotaExceeded {
            retry_after_secs: 60,
        };
        assert!(err.to_string().contains("60"));

        let err = Error::Cancelled;
        assert_eq!(err.to_string(), "operation cancelled");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::transient("timeout").is_retryable());
        assert!(
            Error::QuotaExceeded {
                retry_after_secs: 1
            }
            .is_retryable()
        );
        assert!(!Error::permanent("404").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::invariant("broken").is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::QuotaExceeded {
                retry_after_secs: 60
            }
            .status_code(),
            429
        );
        assert_eq!(Error::permanent("nope").status_code(), 400);
        assert_eq!(Error::transient("later").status_code(), 503);
        assert_eq!(Error::invariant("bug").status_code(), 500);
        assert_eq!(Error::NoConvergence { rounds: 1, k: 1 }.status_code(), 500);
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::red_flag("x").kind(), "red_flag");
        assert_eq!(Error::transient("x").kind(), "transient_io");
    }

    #[test]
    fn test_from_io_not_found_is_permanent() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::PermanentIo { .. }));
    }

    #[test]
    fn test_from_io_other_is_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::TransientIo { .. }));
    }

    #[test]
    fn test_from_rusqlite() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Invariant { .. }));
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Invariant { .. }));
    }
}
