//! Error types for breaker construction and the async execution path.
//!
//! A circuit-open rejection is deliberately *not* an error: it is an
//! expected, frequent outcome during an outage and is signaled as `Ok(None)`
//! by both wrappers.

use thiserror::Error;

/// Construction-time validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter was outside its documented domain.
    #[error("invalid breaker configuration: {message}")]
    Invalid {
        /// Which parameter was rejected and why.
        message: String,
    },
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures surfaced by [`AsyncBreaker::execute`](crate::AsyncBreaker::execute).
///
/// `WorkerUnavailable` means the bookkeeping worker could not accept the
/// request (shut down or its task gone); callers must not mistake it for a
/// healthy-but-open circuit, which is reported as `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum AsyncBreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The serialized worker is gone; no decision could be made.
    #[error("circuit breaker worker unavailable")]
    WorkerUnavailable,

    /// The protected operation failed; the original error passes through
    /// unchanged after being recorded as a failed attempt.
    #[error(transparent)]
    Operation(E),
}

impl<E> AsyncBreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Recover the protected operation's own error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(source) => Some(source),
            Self::WorkerUnavailable => None,
        }
    }
}
