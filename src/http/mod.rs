//! HTTP surface: the rate limit layer and the server that mounts it.

mod layer;
mod server;

pub use layer::{
    request_context, RateLimitLayer, RateLimitRejection, RateLimitService, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;
