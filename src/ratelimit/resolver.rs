//! Effective limit resolution.

use std::sync::Arc;
use tracing::trace;

use super::context::RequestContext;
use super::overrides::OverrideTracker;
use super::rules::{LimitSpec, RateLimitOptions};
use crate::error::{RateLimitError, RateLimitResult};
use crate::store::WindowStore;

/// Determines the ceiling that applies to a request.
///
/// An active override wins outright. Otherwise a tiered limit picks the
/// authenticated ceiling for requests that carry an identity.
pub struct LimitResolver {
    overrides: OverrideTracker,
}

impl LimitResolver {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            overrides: OverrideTracker::new(store),
        }
    }

    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        options: &RateLimitOptions,
    ) -> RateLimitResult<u64> {
        if let Some(spec) = &options.override_spec {
            let active = self
                .overrides
                .check_override(ctx, spec)
                .await
                .map_err(RateLimitError::limit_resolution)?;

            if let Some(limit) = active {
                trace!(limit = limit, "Using override limit");
                return Ok(limit);
            }
        }

        Ok(base_limit(ctx, &options.limit))
    }
}

/// The limit a request gets when no override applies.
pub fn base_limit(ctx: &RequestContext, limit: &LimitSpec) -> u64 {
    match *limit {
        LimitSpec::Flat(limit) => limit,
        LimitSpec::Tiered {
            max_requests,
            authenticated_max_requests,
        } => match authenticated_max_requests {
            Some(authenticated) if authenticated > 0 && ctx.is_authenticated() => authenticated,
            _ => max_requests,
        },
    }
}
