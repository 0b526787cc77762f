//! Transient-failure detection and the bounded retry policy.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;

use crate::config::RetryConfig;
use crate::error::{TaskError, TaskErrorKind};

/// Error signatures that indicate a transient upstream condition.
const TRANSIENT_SIGNATURES: &[&str] = &[
    // rate limiting
    r"rate[\s_-]?limit",
    r"\b429\b",
    r"too many requests",
    r"overloaded",
    // timeouts
    r"timeout",
    r"timed out",
    // connection reset / refused
    r"econnreset",
    r"connection reset",
    r"econnrefused",
    r"connection refused",
    // upstream 5xx
    r"\b50[0234]\b",
    r"bad gateway",
    r"service unavailable",
    r"gateway timeout",
    r"internal server error",
    // socket / tunnel termination
    r"socket hang up",
    r"socket closed",
    r"other side closed",
    r"tunnel",
    r"fetch failed",
];

fn signatures() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| {
        let patterns = TRANSIENT_SIGNATURES.iter().map(|p| format!("(?i){}", p));
        match RegexSet::new(patterns) {
            Ok(set) => Some(set),
            Err(e) => {
                tracing::error!("invalid transient signature set: {}", e);
                None
            }
        }
    })
    .as_ref()
}

/// True when `message` matches a known transient signature.
pub fn is_retryable(message: &str) -> bool {
    signatures().is_some_and(|set| set.is_match(message))
}

/// Decides whether a failed attempt is worth repeating.
pub trait RetryClassifier: Send + Sync {
    fn is_transient(&self, error: &TaskError) -> bool;
}

/// Typed kinds decide where they can; [`TaskErrorKind::Other`] falls back
/// to the message signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier;

impl RetryClassifier for SignatureClassifier {
    fn is_transient(&self, error: &TaskError) -> bool {
        match error.kind {
            TaskErrorKind::RateLimited | TaskErrorKind::Timeout | TaskErrorKind::Connection => {
                true
            }
            TaskErrorKind::Upstream(status) => (500..600).contains(&status) || status == 429,
            TaskErrorKind::Permanent => false,
            TaskErrorKind::Other => is_retryable(&error.message),
        }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    /// Delay before retry number `retry` (1-based): linear in the retry index.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_step.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_step())
    }
}
