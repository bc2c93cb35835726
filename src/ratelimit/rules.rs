//! Per-route rate limit rules.
//!
//! A rule describes the trailing window, the base limit (flat or split by
//! authentication), the rejection message, how the window key is derived and
//! an optional event-triggered override. Rules are usually loaded from YAML:
//!
//! ```yaml
//! window_ms: 60000
//! limit:
//!   max_requests: 5
//!   authenticated_max_requests: 10
//! override:
//!   limit: 10
//!   event: ["override"]
//!   window_ms: 60000
//! ```

use serde::{Deserialize, Serialize};

use super::context::RequestContext;
use super::key::{KeyGenerator, RateLimitKey};
use crate::error::{Result, SlidegateError};

/// Rejection message used when a rule does not set one.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later";

/// Longest accepted window or override lifetime: one year.
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// The base limit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitSpec {
    /// The same ceiling for every request
    Flat(u64),
    /// A separate ceiling for requests carrying an authenticated identity
    Tiered {
        max_requests: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authenticated_max_requests: Option<u64>,
    },
}

/// An elevated limit that applies once a trigger event is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSpec {
    /// Limit that replaces the base limit while the override lives
    pub limit: u64,
    /// Event names that establish the override
    #[serde(rename = "event", alias = "events", default)]
    pub trigger_events: Vec<String>,
    /// How long the override lives, in milliseconds
    pub window_ms: u64,
}

impl OverrideSpec {
    pub fn new<I, S>(limit: u64, events: I, window_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            limit,
            trigger_events: events.into_iter().map(Into::into).collect(),
            window_ms,
        }
    }

    pub fn is_triggered_by(&self, event: &str) -> bool {
        self.trigger_events.iter().any(|e| e == event)
    }
}

/// Rate limit options for one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitOptions {
    /// Trailing window in milliseconds
    pub window_ms: u64,
    /// Base limit
    pub limit: LimitSpec,
    /// Rejection message
    #[serde(default = "default_message")]
    pub message: String,
    /// Fixed window key shared by every client of the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Event-triggered override
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_spec: Option<OverrideSpec>,
    /// Custom key generator, takes precedence over `key`
    #[serde(skip)]
    pub key_fn: Option<KeyGenerator>,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl RateLimitOptions {
    /// Options with a flat limit and every other field defaulted.
    pub fn new(window_ms: u64, limit: u64) -> Self {
        Self {
            window_ms,
            limit: LimitSpec::Flat(limit),
            message: default_message(),
            key: None,
            override_spec: None,
            key_fn: None,
        }
    }

    pub fn builder(window_ms: u64) -> RateLimitOptionsBuilder {
        RateLimitOptionsBuilder::new(window_ms)
    }

    /// Load a rule from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let options: RateLimitOptions = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse rate limit rule: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject rules that could never admit a request or never expire.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(SlidegateError::Config("window_ms must be positive".to_string()));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(SlidegateError::Config(format!(
                "window_ms must not exceed {}",
                MAX_WINDOW_MS
            )));
        }

        match self.limit {
            LimitSpec::Flat(0) | LimitSpec::Tiered { max_requests: 0, .. } => {
                return Err(SlidegateError::Config("limit must be positive".to_string()));
            }
            _ => {}
        }

        if let Some(spec) = &self.override_spec {
            if spec.limit == 0 {
                return Err(SlidegateError::Config("override.limit must be positive".to_string()));
            }
            if spec.window_ms == 0 {
                return Err(SlidegateError::Config(
                    "override.window_ms must be positive".to_string(),
                ));
            }
            if spec.window_ms > MAX_WINDOW_MS {
                return Err(SlidegateError::Config(format!(
                    "override.window_ms must not exceed {}",
                    MAX_WINDOW_MS
                )));
            }
        }

        Ok(())
    }

    /// The window key for a request.
    ///
    /// A custom generator wins over a fixed key, which wins over the
    /// per-client default.
    pub fn key_for(&self, ctx: &RequestContext) -> RateLimitKey {
        if let Some(generator) = &self.key_fn {
            return generator.generate(ctx);
        }
        match &self.key {
            Some(key) => RateLimitKey::new(key.clone()),
            None => RateLimitKey::for_client(ctx),
        }
    }
}

/// Builder for [`RateLimitOptions`].
#[must_use = "builder does nothing until you call build()"]
pub struct RateLimitOptionsBuilder {
    options: RateLimitOptions,
}

impl RateLimitOptionsBuilder {
    pub fn new(window_ms: u64) -> Self {
        Self {
            options: RateLimitOptions::new(window_ms, 1),
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = LimitSpec::Flat(limit);
        self
    }

    pub fn tiered(mut self, max_requests: u64, authenticated_max_requests: u64) -> Self {
        self.options.limit = LimitSpec::Tiered {
            max_requests,
            authenticated_max_requests: Some(authenticated_max_requests),
        };
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.options.message = message.into();
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.options.key = Some(key.into());
        self
    }

    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> RateLimitKey + Send + Sync + 'static,
    {
        self.options.key_fn = Some(KeyGenerator::new(f));
        self
    }

    pub fn override_spec(mut self, spec: OverrideSpec) -> Self {
        self.options.override_spec = Some(spec);
        self
    }

    pub fn build(self) -> RateLimitOptions {
        self.options
    }
}
