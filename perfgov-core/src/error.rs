//! # Governor Error Types
//!
//! Centralized error handling for the performance governance layer.
//!
//! Only admission-control and task failures are surfaced to callers as typed
//! errors. Bookkeeping failures (cache size estimation, metrics export) are
//! swallowed by the component that hit them and logged.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for governor operations
pub type Result<T> = std::result::Result<T, GovernorError>;

/// Core error types for the governor
///
/// `Clone` so that one coalesced computation can hand the same outcome to
/// every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernorError {
    /// The caller used up its request budget for the current window
    #[error("Rate limit exceeded for '{key}', retry after {retry_after:?}")]
    RateLimitExceeded {
        key: String,
        retry_after: Duration,
    },

    /// A worker reported an error for a dispatched task
    #[error("Task '{kind}' failed: {message}")]
    TaskExecutionFailed { kind: String, message: String },

    /// The caller stopped waiting for a task result
    #[error("Task '{kind}' timed out after {timeout:?}")]
    TaskTimedOut { kind: String, timeout: Duration },

    /// No worker can accept tasks (pool empty or shut down)
    #[error("Dispatcher unavailable: {0}")]
    DispatcherUnavailable(String),

    /// Export or size-estimation serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Invalidation pattern is not a valid regex
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A compute function passed to the cache failed
    #[error("Compute error: {0}")]
    Compute(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl GovernorError {
    /// Create a new rate limit error
    pub fn rate_limited(key: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimitExceeded {
            key: key.into(),
            retry_after,
        }
    }

    /// Create a new task execution error
    pub fn task_failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskExecutionFailed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a new dispatcher unavailable error
    pub fn dispatcher_unavailable(msg: impl Into<String>) -> Self {
        Self::DispatcherUnavailable(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationFailed(msg.into())
    }

    /// Create a new invalid pattern error
    pub fn invalid_pattern(msg: impl Into<String>) -> Self {
        Self::InvalidPattern(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new compute error
    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    /// Create a new generic/other error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status the error layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RateLimitExceeded { .. } => 429,
            Self::TaskTimedOut { .. } | Self::DispatcherUnavailable(_) => 503,
            Self::InvalidPattern(_) => 400,
            Self::TaskExecutionFailed { .. }
            | Self::SerializationFailed(_)
            | Self::Configuration(_)
            | Self::Compute(_)
            | Self::Other(_) => 500,
        }
    }

    /// Retry hint in whole seconds (rounded up, at least 1)
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }

    /// Whether this is an admission rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

impl From<serde_json::Error> for GovernorError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<regex::Error> for GovernorError {
    fn from(err: regex::Error) -> Self {
        Self::InvalidPattern(err.to_string())
    }
}
