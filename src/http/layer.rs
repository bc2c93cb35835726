//! Tower layer that puts a route behind the rate limiter.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{ConnectInfo, Query, Request},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};

use crate::ratelimit::{AuthenticatedIdentity, RateLimitInfo, RateLimitOptions, RateLimiter, RequestContext};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON body of a 429 response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub error: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

impl RateLimitRejection {
    fn into_response_with(self, info: &RateLimitInfo) -> Response {
        let retry_after = self.retry_after;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        let headers = response.headers_mut();
        set_rate_limit_headers(headers, info);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    event: Option<String>,
}

fn set_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(info.reset_time));
}

/// Build the limiter's view of a request.
///
/// Proxy headers are consulted only when `trust_proxy` is set; otherwise a
/// client could pick its own window key.
pub fn request_context(req: &Request, trust_proxy: bool) -> RequestContext {
    let socket_ip = || {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    let client_addr = if trust_proxy {
        forwarded_ip(req.headers()).or_else(socket_ip)
    } else {
        socket_ip()
    };

    let event = Query::<EventQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.event)
        .filter(|e| !e.is_empty());

    RequestContext {
        client_addr,
        identity: req.extensions().get::<AuthenticatedIdentity>().cloned(),
        event,
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        // Leftmost entry is the original client.
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Tower layer for rate limiting one route.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    options: Arc<RateLimitOptions>,
    trust_proxy: bool,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>, options: RateLimitOptions) -> Self {
        Self {
            limiter,
            options: Arc::new(options),
            trust_proxy: false,
        }
    }

    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            options: self.options.clone(),
            trust_proxy: self.trust_proxy,
        }
    }
}

/// Tower service for rate limiting
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    options: Arc<RateLimitOptions>,
    trust_proxy: bool,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let ctx = request_context(&req, self.trust_proxy);
        let limiter = self.limiter.clone();
        let options = self.options.clone();

        // Use the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision = limiter.decide(&ctx, &options).await;

            let Some(info) = decision.info else {
                // Limiter failed: pass through without rate limit headers.
                return Ok(inner.call(req).await?.into_response());
            };

            if !decision.admit {
                let rejection = RateLimitRejection {
                    error: options.message.clone(),
                    retry_after: decision.retry_after_secs.unwrap_or(0),
                };
                return Ok(rejection.into_response_with(&info));
            }

            let mut response = inner.call(req).await?.into_response();
            set_rate_limit_headers(response.headers_mut(), &info);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, OverrideSpec};
    use crate::store::testing::FlakyGetStore;
    use crate::store::{InMemoryStore, WindowStore};
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Router};
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_000_000;

    fn app(store: Arc<dyn WindowStore>, options: RateLimitOptions) -> Router {
        let limiter = Arc::new(RateLimiter::with_clock(store, Arc::new(ManualClock::new(T0))));
        Router::new()
            .route("/limited", get(|| async { "Rate limiter example" }))
            .route_layer(RateLimitLayer::new(limiter, options))
    }

    fn request(uri: &str) -> Request {
        HttpRequest::builder()
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
            .body(Body::empty())
            .unwrap()
    }

    fn header(response: &Response, name: &HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    async fn seed(store: &InMemoryStore, n: usize) {
        for i in 0..n {
            let score = T0 - 1_000 * (n - i) as i64;
            store
                .zadd("ratelimit:ip:127.0.0.1", score, &format!("{}-seed", score))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_admitted_request_carries_headers() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, 3).await;
        let app = app(store, RateLimitOptions::new(60_000, 5));

        let response = app.oneshot(request("/limited")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, &X_RATELIMIT_LIMIT).as_deref(), Some("5"));
        assert_eq!(header(&response, &X_RATELIMIT_REMAINING).as_deref(), Some("1"));
        assert_eq!(
            header(&response, &X_RATELIMIT_RESET),
            Some((T0 + 60_000).to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_request_gets_429_json() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, 5).await;
        let app = app(store, RateLimitOptions::new(60_000, 5));

        let response = app.oneshot(request("/limited")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, &X_RATELIMIT_REMAINING).as_deref(), Some("0"));
        assert_eq!(header(&response, &axum::http::header::RETRY_AFTER).as_deref(), Some("55"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rejection: RateLimitRejection = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            rejection,
            RateLimitRejection {
                error: "Too many requests, please try again later".to_string(),
                retry_after: 55,
            }
        );
    }

    #[tokio::test]
    async fn test_custom_message_in_rejection() {
        let store = Arc::new(InMemoryStore::new());
        let options = RateLimitOptions::builder(60_000).limit(1).message("Slow down").build();
        let app = app(store, options);

        let response = app.oneshot(request("/limited")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Slow down");
        assert_eq!(json["retryAfter"], 60);
    }

    #[tokio::test]
    async fn test_event_query_establishes_override() {
        let store = Arc::new(InMemoryStore::new());
        let options = RateLimitOptions::builder(60_000)
            .limit(5)
            .override_spec(OverrideSpec::new(10, ["special"], 60_000))
            .build();
        let app = app(store.clone(), options);

        let response = app.clone().oneshot(request("/limited?event=special")).await.unwrap();
        assert_eq!(header(&response, &X_RATELIMIT_LIMIT).as_deref(), Some("10"));
        assert_eq!(
            store.get("override:127.0.0.1").await.unwrap(),
            Some("10".to_string())
        );

        let response = app.oneshot(request("/limited")).await.unwrap();
        assert_eq!(header(&response, &X_RATELIMIT_LIMIT).as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_store_failure_passes_through_without_headers() {
        let store = Arc::new(FlakyGetStore::failing());
        let options = RateLimitOptions::builder(60_000)
            .limit(5)
            .override_spec(OverrideSpec::new(4, ["special"], 60_000))
            .build();
        let app = app(store, options);

        let response = app.oneshot(request("/limited?event=special")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
        assert!(response.headers().get(X_RATELIMIT_REMAINING).is_none());
        assert!(response.headers().get(X_RATELIMIT_RESET).is_none());
    }

    #[tokio::test]
    async fn test_authenticated_identity_extension() {
        let store = Arc::new(InMemoryStore::new());
        let app = app(store, RateLimitOptions::builder(60_000).tiered(5, 10).build());

        let mut req = request("/limited");
        req.extensions_mut().insert(AuthenticatedIdentity("dave".to_string()));
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(header(&response, &X_RATELIMIT_LIMIT).as_deref(), Some("10"));
    }

    #[test]
    fn test_request_context_ignores_proxy_headers_by_default() {
        let req = HttpRequest::builder()
            .uri("/limited?event=launch&other=1")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .extension(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 5555))))
            .body(Body::empty())
            .unwrap();

        let ctx = request_context(&req, false);
        assert_eq!(ctx.client_addr, Some(IpAddr::from([10, 1, 2, 3])));
        assert_eq!(ctx.event.as_deref(), Some("launch"));
        assert!(!ctx.is_authenticated());

        let ctx = request_context(&req, true);
        assert_eq!(ctx.client_addr, Some(IpAddr::from([203, 0, 113, 9])));
    }

    #[test]
    fn test_request_context_without_address_or_event() {
        let req = HttpRequest::builder().uri("/limited").body(Body::empty()).unwrap();

        let ctx = request_context(&req, true);
        assert_eq!(ctx.client_addr, None);
        assert_eq!(ctx.event, None);
    }
}
