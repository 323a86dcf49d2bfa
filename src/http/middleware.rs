//! Admission middleware.
//!
//! Wraps a downstream service and rejects requests whose scope has used up
//! its window with `429 Too Many Requests`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::{HeaderName, StatusCode};
use tower::{Layer, Service};
use tracing::{debug, error};

use crate::ratelimit::{RateLimiter, ScopeSelector};

/// Body sent with every rejection.
pub const REJECTION_BODY: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Address used when the connection info is not available.
const UNKNOWN_ADDRESS: &str = "unknown";

/// Admission decisions for incoming requests.
#[derive(Debug)]
pub struct Admission {
    limiter: Arc<RateLimiter>,
    selector: ScopeSelector,
    api_key_header: HeaderName,
}

impl Admission {
    /// Create an admission policy.
    pub fn new(
        limiter: Arc<RateLimiter>,
        selector: ScopeSelector,
        api_key_header: HeaderName,
    ) -> Self {
        Self {
            limiter,
            selector,
            api_key_header,
        }
    }

    /// Decide whether a request with this identity may proceed.
    ///
    /// Fails closed: an engine error rejects the request.
    pub async fn admit(&self, credential: Option<&str>, address: &str) -> bool {
        let scope = self.selector.select(credential, address);

        match self.limiter.allow(&scope.key, scope.limit, scope.window).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(scope = %scope, token = scope.is_token(), "Request rejected by rate limit");
                false
            }
            Err(e) => {
                error!(scope = %scope, error = %e, "Rate limiter unavailable, rejecting request");
                false
            }
        }
    }

    /// Extract the credential and remote address of a request.
    pub fn identify(&self, request: &Request) -> (Option<String>, String) {
        let credential = request
            .headers()
            .get(&self.api_key_header)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let address = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.to_string())
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

        (credential, address)
    }
}

/// Build the response sent to rejected requests.
pub fn too_many_requests() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, REJECTION_BODY).into_response()
}

/// A layer that applies [`Admission`] to every request.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    admission: Arc<Admission>,
}

impl AdmissionLayer {
    /// Create a new admission layer.
    pub fn new(admission: Admission) -> Self {
        Self {
            admission: Arc::new(admission),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            admission: self.admission.clone(),
        }
    }
}

/// Middleware service that forwards admitted requests unchanged.
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    admission: Arc<Admission>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let admission = self.admission.clone();
        // Keep the instance that was polled ready for this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        // The body is not Sync, so nothing borrowed from the request may cross an await
        let (credential, address) = admission.identify(&request);

        Box::pin(async move {
            if admission.admit(credential.as_deref(), &address).await {
                inner.call(request).await
            } else {
                Ok(too_many_requests())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ratelimit::{CounterStore, LimitRule, MemoryStore, RateLimitRules};
    use async_trait::async_trait;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: u64,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn increment(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn rules() -> RateLimitRules {
        RateLimitRules::new(LimitRule::new(5, 60)).with_token("testtoken", LimitRule::new(10, 60))
    }

    fn app(limiter: Arc<RateLimiter>, rules: RateLimitRules) -> Router {
        let admission = Admission::new(
            limiter,
            ScopeSelector::new(rules),
            HeaderName::from_static("api_key"),
        );
        Router::new()
            .route("/", get(|| async { "Hello, World!" }))
            .layer(AdmissionLayer::new(admission))
    }

    fn memory_app(rules: RateLimitRules) -> Router {
        let store = Arc::new(MemoryStore::new());
        app(Arc::new(RateLimiter::new(store.clone(), store)), rules)
    }

    fn request(token: Option<&str>, addr: &str) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(token) = token {
            builder = builder.header("API_KEY", token);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = addr.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_ip_limit_rejects_sixth_request() {
        let app = memory_app(rules());

        for i in 1..=5 {
            let response = app.clone().oneshot(request(None, "127.0.0.1:12345")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "Request {} should pass", i);
            assert_eq!(body_string(response).await, "Hello, World!");
        }

        let response = app.clone().oneshot(request(None, "127.0.0.1:12345")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_string(response).await, REJECTION_BODY);
    }

    #[tokio::test]
    async fn test_token_limit_takes_priority() {
        let app = memory_app(rules());

        for i in 1..=10 {
            let response = app
                .clone()
                .oneshot(request(Some("testtoken"), "127.0.0.1:12345"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "Request {} should pass", i);
        }

        let response = app
            .clone()
            .oneshot(request(Some("testtoken"), "127.0.0.1:12345"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // The address scope was never charged
        let response = app.clone().oneshot(request(None, "127.0.0.1:12345")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_token_counts_against_address() {
        let app = memory_app(rules());

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request(Some("stranger"), "10.0.0.1:4000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request(None, "10.0.0.1:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_token_default_gives_unlisted_credential_its_own_bucket() {
        let app = memory_app(rules().with_token_default(LimitRule::new(2, 60)));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request(Some("stranger"), "10.0.0.1:4000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request(Some("stranger"), "10.0.0.1:4000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // The address scope was never charged
        let response = app.clone().oneshot(request(None, "10.0.0.1:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let app = memory_app(RateLimitRules::new(LimitRule::new(1, 60)));

        let first = app.clone().oneshot(request(None, "10.0.0.1:1")).await.unwrap();
        let second = app.clone().oneshot(request(None, "10.0.0.2:1")).await.unwrap();
        let repeat = app.clone().oneshot(request(None, "10.0.0.1:1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_engine_error_fails_closed() {
        let limiter = Arc::new(RateLimiter::new(Arc::new(DownStore), Arc::new(DownStore)));
        let app = app(limiter, rules());

        let response = app.oneshot(request(None, "127.0.0.1:12345")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_string(response).await, REJECTION_BODY);
    }

    #[tokio::test]
    async fn test_primary_failure_served_by_secondary() {
        let secondary = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(Arc::new(DownStore), secondary.clone()));
        let app = app(limiter.clone(), rules());

        let response = app.oneshot(request(None, "127.0.0.1:12345")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(secondary.get("ip:127.0.0.1:12345").await.unwrap(), Some(1));
        assert_eq!(limiter.backend(), crate::ratelimit::Backend::Secondary);
    }

    #[tokio::test]
    async fn test_missing_connect_info_uses_shared_bucket() {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(store.clone(), store.clone()));
        let app = app(limiter, RateLimitRules::new(LimitRule::new(1, 60)));

        let request = http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.get("ip:unknown").await.unwrap(), Some(1));
    }
}
