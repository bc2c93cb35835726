//! Store key generation and handling.

use std::fmt;
use std::sync::Arc;

use super::context::RequestContext;

/// Namespace for sliding window logs.
pub const RATE_LIMIT_PREFIX: &str = "ratelimit";
/// Namespace for override records.
pub const OVERRIDE_PREFIX: &str = "override";

/// A key that identifies one sliding window log in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The default per-client key: `ratelimit:ip:<address>`.
    pub fn for_client(ctx: &RequestContext) -> Self {
        Self(format!("{}:ip:{}", RATE_LIMIT_PREFIX, ctx.client_label()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key under which a client's override record lives: `override:<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideKey(String);

impl OverrideKey {
    pub fn for_client(ctx: &RequestContext) -> Self {
        Self(format!("{}:{}", OVERRIDE_PREFIX, ctx.client_label()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied function mapping a request to its window key.
#[derive(Clone)]
pub struct KeyGenerator(Arc<dyn Fn(&RequestContext) -> RateLimitKey + Send + Sync>);

impl KeyGenerator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> RateLimitKey + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn generate(&self, ctx: &RequestContext) -> RateLimitKey {
        (self.0)(ctx)
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyGenerator(..)")
    }
}
