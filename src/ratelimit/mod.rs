//! Rate limiting logic: limit resolution, overrides, sliding window counting
//! and the per-request decision.

mod clock;
mod context;
mod counter;
mod key;
mod limiter;
mod overrides;
mod resolver;
mod rules;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{AuthenticatedIdentity, RequestContext};
pub use counter::{RateLimitInfo, SlidingWindowCounter};
pub use key::{KeyGenerator, OverrideKey, RateLimitKey, OVERRIDE_PREFIX, RATE_LIMIT_PREFIX};
pub use limiter::{Decision, Outcome, RateLimiter};
pub use overrides::OverrideTracker;
pub use resolver::{base_limit, LimitResolver};
pub use rules::{
    LimitSpec, OverrideSpec, RateLimitOptions, RateLimitOptionsBuilder, DEFAULT_MESSAGE, MAX_WINDOW_MS,
};
