//! Error types for the Slidegate service.

use thiserror::Error;

/// Failures raised while making a rate limit decision.
///
/// Lower layers wrap the error they hit in a coarse category and re-raise it.
/// Only [`RateLimiter::decide`](crate::ratelimit::RateLimiter::decide) catches
/// these, and it always turns them into a fail-open admission.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// A backing store command failed (connectivity, timeout, protocol)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The override record could not be read or written
    #[error("override check failed")]
    OverrideCheckFailed(#[source] Box<RateLimitError>),

    /// The effective limit for the request could not be determined
    #[error("limit resolution failed")]
    LimitResolutionFailed(#[source] Box<RateLimitError>),

    /// The sliding window could not be updated or counted
    #[error("counter unavailable")]
    CounterUnavailable(#[source] Box<RateLimitError>),
}

impl RateLimitError {
    pub(crate) fn override_check(source: RateLimitError) -> Self {
        RateLimitError::OverrideCheckFailed(Box::new(source))
    }

    pub(crate) fn limit_resolution(source: RateLimitError) -> Self {
        RateLimitError::LimitResolutionFailed(Box::new(source))
    }

    pub(crate) fn counter(source: RateLimitError) -> Self {
        RateLimitError::CounterUnavailable(Box::new(source))
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::StoreUnavailable(err.to_string())
    }
}

/// Result type for store and rate limit operations.
pub type RateLimitResult<T> = std::result::Result<T, RateLimitError>;

/// Main error type for Slidegate operations.
#[derive(Error, Debug)]
pub enum SlidegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing store setup errors
    #[error("Store error: {0}")]
    Store(String),

    /// Rate limiting errors
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SlidegateError {
    fn from(err: config::ConfigError) -> Self {
        SlidegateError::Config(err.to_string())
    }
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, SlidegateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_keep_their_source() {
        let err = RateLimitError::limit_resolution(RateLimitError::override_check(
            RateLimitError::StoreUnavailable("connection refused".to_string()),
        ));

        let messages: Vec<String> = std::iter::successors(
            Some(&err as &(dyn std::error::Error + 'static)),
            |e| e.source(),
        )
        .map(ToString::to_string)
        .collect();

        assert_eq!(
            messages,
            [
                "limit resolution failed",
                "override check failed",
                "store unavailable: connection refused",
            ]
        );
    }

    #[test]
    fn test_rate_limit_error_converts_to_service_error() {
        let err: SlidegateError =
            RateLimitError::counter(RateLimitError::StoreUnavailable("timeout".to_string())).into();
        assert!(matches!(err, SlidegateError::RateLimit(RateLimitError::CounterUnavailable(_))));
    }
}
