//! Event-triggered limit overrides.
//!
//! The first request carrying a trigger event writes an override record for
//! its client. Until that record expires it is the client's limit, whatever
//! later requests carry. A repeated trigger does not extend it.

use std::sync::Arc;
use tracing::{debug, warn};

use super::context::RequestContext;
use super::key::OverrideKey;
use super::rules::OverrideSpec;
use crate::error::{RateLimitError, RateLimitResult};
use crate::store::WindowStore;

/// Reads and establishes override records.
pub struct OverrideTracker {
    store: Arc<dyn WindowStore>,
}

impl OverrideTracker {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Return the override limit for this request's client, if any.
    ///
    /// Store failures surface as [`RateLimitError::OverrideCheckFailed`];
    /// they are never reported as "no override".
    pub async fn check_override(
        &self,
        ctx: &RequestContext,
        spec: &OverrideSpec,
    ) -> RateLimitResult<Option<u64>> {
        self.check(ctx, spec)
            .await
            .map_err(RateLimitError::override_check)
    }

    async fn check(&self, ctx: &RequestContext, spec: &OverrideSpec) -> RateLimitResult<Option<u64>> {
        let key = OverrideKey::for_client(ctx);

        if let Some(stored) = self.store.get(key.as_str()).await? {
            if !stored.is_empty() {
                return Ok(parse_record(&key, &stored));
            }
        }

        match ctx.event.as_deref() {
            Some(event) if spec.is_triggered_by(event) => {
                self.store
                    .set_px(key.as_str(), &spec.limit.to_string(), spec.window_ms)
                    .await?;
                debug!(
                    key = %key,
                    event = event,
                    limit = spec.limit,
                    window_ms = spec.window_ms,
                    "Override established"
                );
                Ok(Some(spec.limit))
            }
            _ => Ok(None),
        }
    }
}

/// An unreadable or zero record yields no override and is left to expire.
fn parse_record(key: &OverrideKey, stored: &str) -> Option<u64> {
    match stored.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(key = %key, value = stored, "Ignoring malformed override record");
            None
        }
        Ok(limit) => Some(limit),
    }
}
