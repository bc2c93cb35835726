//! Per-request admission decisions.

use std::sync::Arc;
use tracing::{debug, error, trace};

use super::clock::{Clock, SystemClock};
use super::context::RequestContext;
use super::counter::{RateLimitInfo, SlidingWindowCounter};
use super::key::RateLimitKey;
use super::resolver::LimitResolver;
use super::rules::RateLimitOptions;
use crate::error::RateLimitResult;
use crate::store::WindowStore;

/// Where a request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Under the limit
    Admit,
    /// Window saturated, respond with 429
    Reject,
    /// The limiter itself failed; the request goes through unmetered
    AdmitOnError,
}

/// The result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may continue down the pipeline
    pub admit: bool,
    /// Window state, absent when the limiter failed
    pub info: Option<RateLimitInfo>,
    /// Whether the decision was forced by an infrastructure failure
    pub error_occurred: bool,
    /// Seconds until the window admits again, set on rejection
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    fn admit(info: RateLimitInfo) -> Self {
        Self {
            admit: true,
            info: Some(info),
            error_occurred: false,
            retry_after_secs: None,
        }
    }

    fn reject(info: RateLimitInfo, retry_after_secs: u64) -> Self {
        Self {
            admit: false,
            info: Some(info),
            error_occurred: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    fn fail_open() -> Self {
        Self {
            admit: true,
            info: None,
            error_occurred: true,
            retry_after_secs: None,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match (self.admit, self.error_occurred) {
            (_, true) => Outcome::AdmitOnError,
            (true, false) => Outcome::Admit,
            (false, false) => Outcome::Reject,
        }
    }
}

/// The rate limiter: resolves the limit, counts the window, decides.
///
/// Holds no per-key state of its own; everything shared lives in the store.
pub struct RateLimiter {
    resolver: LimitResolver,
    counter: SlidingWindowCounter,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on top of a connected store.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: LimitResolver::new(store.clone()),
            counter: SlidingWindowCounter::with_clock(store, clock.clone()),
            clock,
        }
    }

    /// Decide whether a request is admitted.
    ///
    /// Never fails: a store error anywhere along the way is logged and the
    /// request is admitted without rate limit information.
    pub async fn decide(&self, ctx: &RequestContext, options: &RateLimitOptions) -> Decision {
        let key = options.key_for(ctx);

        let info = match self.evaluate(ctx, options, &key).await {
            Ok(info) => info,
            Err(e) => {
                error!(
                    key = %key,
                    error = &e as &(dyn std::error::Error + 'static),
                    "Rate limiter error, admitting request"
                );
                return Decision::fail_open();
            }
        };

        if !info.is_exceeded() {
            trace!(key = %key, remaining = info.remaining, "Request admitted");
            return Decision::admit(info);
        }

        let retry_after = info.retry_after_secs(self.clock.now_ms());
        debug!(
            key = %key,
            limit = info.limit,
            current = info.current,
            retry_after = retry_after,
            "Rate limit exceeded"
        );
        Decision::reject(info, retry_after)
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        options: &RateLimitOptions,
        key: &RateLimitKey,
    ) -> RateLimitResult<RateLimitInfo> {
        let limit = self.resolver.resolve(ctx, options).await?;
        self.counter
            .record_and_count(key, limit, options.window_ms)
            .await
    }
}
