//! Per-request inputs to a rate limit decision.

use std::net::IpAddr;

/// Identity established by an upstream authentication layer.
///
/// Authentication middleware inserts this into the request extensions; the
/// rate limit layer only checks for its presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity(pub String);

/// Everything the limiter needs to know about one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Network address of the client, if known
    pub client_addr: Option<IpAddr>,
    /// Authenticated identity, if the request carries one
    pub identity: Option<AuthenticatedIdentity>,
    /// Event signal carried by the request (the `event` query parameter)
    pub event: Option<String>,
}

impl RequestContext {
    pub fn new(client_addr: Option<IpAddr>) -> Self {
        Self {
            client_addr,
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(AuthenticatedIdentity(identity.into()));
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// The client address rendered for use in store keys.
    pub fn client_label(&self) -> String {
        match self.client_addr {
            Some(addr) => addr.to_string(),
            None => "unknown".to_string(),
        }
    }
}
