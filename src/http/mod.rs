//! HTTP adapter over the rate limiting core.
//!
//! Turns axum requests into [`RequestAttributes`](crate::ratelimit::RequestAttributes),
//! runs them through a [`LimiterChain`], and turns denials into 429 responses.
//! All routes sit behind the global IP limiter; user and admin routes add
//! their own limiter after it.

mod handlers;
mod middleware;
mod server;

pub use middleware::{
    enforce, request_attributes, RejectionBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::HttpServer;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;

use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{
    Clock, KeyStrategyKind, KeyedCounterStore, Limit, LimiterChain, RateLimiter,
};

/// The three independent limiters of the service, each with its own store.
#[derive(Debug, Clone)]
pub struct Limiters {
    /// Per client IP, on every route
    pub global: Arc<RateLimiter>,
    /// Per user id, on user routes
    pub user: Arc<RateLimiter>,
    /// Per API key, on admin routes
    pub admin: Arc<RateLimiter>,
}

impl Limiters {
    /// Build the limiters from configuration.
    ///
    /// Fails when any limit or the window is zero.
    pub fn from_config(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let build = |name: &str, max: u64, kind: KeyStrategyKind| -> Result<Arc<RateLimiter>> {
            let limit = Limit::new(max, config.window())?;
            let store = KeyedCounterStore::new().with_idle_threshold(config.idle_threshold());
            let limiter = RateLimiter::with_store(name, limit, kind.build(), Arc::new(store))
                .with_clock(Arc::clone(&clock));
            Ok(Arc::new(limiter))
        };

        Ok(Self {
            global: build("IP", config.global_rate_limit, KeyStrategyKind::Ip)?,
            user: build("User", config.user_rate_limit, KeyStrategyKind::User)?,
            admin: build("API key", config.admin_rate_limit, KeyStrategyKind::ApiKey)?,
        })
    }

    /// Get every store, for the reaper.
    pub fn stores(&self) -> [Arc<KeyedCounterStore>; 3] {
        [
            Arc::clone(self.global.store()),
            Arc::clone(self.user.store()),
            Arc::clone(self.admin.store()),
        ]
    }
}

/// Build the API router with rate limiting applied per route group.
pub fn router(limiters: &Limiters) -> Router {
    let global = LimiterChain::new().then(Arc::clone(&limiters.global));
    let user = global.clone().then(Arc::clone(&limiters.user));
    let admin = global.clone().then(Arc::clone(&limiters.admin));

    let public_routes = Router::new()
        .route("/api/public", get(handlers::public_info))
        .route("/api/ip", get(handlers::ip_info))
        .route_layer(from_fn_with_state(Arc::new(global), enforce));

    let user_routes = Router::new()
        .route("/api/user", get(handlers::user_info))
        .route_layer(from_fn_with_state(Arc::new(user), enforce));

    let admin_routes = Router::new()
        .route("/api/admin", get(handlers::admin_info))
        .route_layer(from_fn_with_state(Arc::new(admin), enforce));

    public_routes.merge(user_routes).merge(admin_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, RateLimitKey};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn limiters(global: u64, user: u64, admin: u64, clock: &ManualClock) -> Limiters {
        let config = RateLimitingConfig {
            global_rate_limit: global,
            user_rate_limit: user,
            admin_rate_limit: admin,
            ..RateLimitingConfig::default()
        };
        Limiters::from_config(&config, Arc::new(clock.clone())).unwrap()
    }

    fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri).header("X-Forwarded-For", "198.51.100.7");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header_u64(response: &Response, name: &str) -> u64 {
        response.headers()[name].to_str().unwrap().parse().unwrap()
    }

    #[test]
    fn test_from_config_rejects_zero_limit() {
        let config = RateLimitingConfig {
            user_rate_limit: 0,
            ..RateLimitingConfig::default()
        };
        assert!(Limiters::from_config(&config, Arc::new(ManualClock::default())).is_err());
    }

    #[test]
    fn test_limiters_have_separate_stores() {
        let limiters = limiters(10, 10, 10, &ManualClock::default());
        let [a, b, c] = limiters.stores();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&b, &c));
    }

    #[tokio::test]
    async fn test_public_endpoint_sets_rate_limit_headers() {
        let clock = ManualClock::default();
        let app = router(&limiters(3, 10, 10, &clock));

        let response = send(&app, get_request("/api/public", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_u64(&response, X_RATELIMIT_LIMIT), 3);
        assert_eq!(header_u64(&response, X_RATELIMIT_REMAINING), 2);
        assert_eq!(header_u64(&response, X_RATELIMIT_RESET), 60);

        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
    }

    #[tokio::test]
    async fn test_global_limit_returns_429() {
        let clock = ManualClock::default();
        let app = router(&limiters(2, 10, 10, &clock));

        for _ in 0..2 {
            let response = send(&app, get_request("/api/public", &[])).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        clock.advance(Duration::from_secs(15));
        let response = send(&app, get_request("/api/public", &[])).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header_u64(&response, header::RETRY_AFTER.as_str()), 45);
        assert_eq!(header_u64(&response, X_RATELIMIT_REMAINING), 0);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["message"], "IP rate limit exceeded. Please try again later.");
    }

    #[tokio::test]
    async fn test_limit_recovers_after_window() {
        let clock = ManualClock::default();
        let app = router(&limiters(1, 10, 10, &clock));

        send(&app, get_request("/api/public", &[])).await;
        let denied = send(&app, get_request("/api/public", &[])).await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::from_secs(61));
        let response = send(&app, get_request("/api/public", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_user_limit_is_per_user() {
        let clock = ManualClock::default();
        let app = router(&limiters(100, 2, 10, &clock));

        for _ in 0..2 {
            let response = send(&app, get_request("/api/user?user_id=42", &[])).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let denied = send(&app, get_request("/api/user?user_id=42", &[])).await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(denied).await;
        assert_eq!(body["message"], "User rate limit exceeded. Please try again later.");

        // Same IP, different user.
        let response = send(&app, get_request("/api/user", &[("X-User-ID", "7")])).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user_id"], "anonymous");
    }

    #[tokio::test]
    async fn test_repeated_user_id_charges_first_value() {
        let clock = ManualClock::default();
        let limiters = limiters(100, 10, 10, &clock);
        let app = router(&limiters);

        let response = send(&app, get_request("/api/user?user_id=1&user_id=2", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user_id"], "1");

        assert_eq!(limiters.user.store().peek(&RateLimitKey::user("1")).unwrap().count(), 1);
        assert!(limiters.user.store().peek(&RateLimitKey::user("2")).is_none());
    }

    #[tokio::test]
    async fn test_user_denial_does_not_consume_admin_budget() {
        let clock = ManualClock::default();
        let limiters = limiters(100, 1, 5, &clock);
        let app = router(&limiters);
        let headers = [("X-API-Key", "secret-key"), ("X-User-ID", "42")];

        send(&app, get_request("/api/user", &headers)).await;
        let denied = send(&app, get_request("/api/user", &headers)).await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = send(&app, get_request("/api/admin", &headers)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_u64(&response, X_RATELIMIT_REMAINING), 4);
        let body = json_body(response).await;
        assert_eq!(body["api_key"], "secre...");

        let key = RateLimitKey::api_key("secret-key");
        assert_eq!(limiters.admin.store().peek(&key).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_global_denial_short_circuits_route_limiter() {
        let clock = ManualClock::default();
        let limiters = limiters(1, 10, 10, &clock);
        let app = router(&limiters);

        send(&app, get_request("/api/user?user_id=42", &[])).await;
        let denied = send(&app, get_request("/api/user?user_id=42", &[])).await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(denied).await;
        assert_eq!(body["message"], "IP rate limit exceeded. Please try again later.");

        let key = RateLimitKey::user("42");
        assert_eq!(limiters.user.store().peek(&key).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_admin_requires_api_key() {
        let clock = ManualClock::default();
        let app = router(&limiters(100, 10, 10, &clock));

        let response = send(&app, get_request("/api/admin", &[])).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_ip_endpoint_reports_rate_limit_key() {
        let clock = ManualClock::default();
        let app = router(&limiters(100, 10, 10, &clock));

        let response = send(&app, get_request("/api/ip", &[("User-Agent", "curl/8.0")])).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["client_ip"], "198.51.100.7");
        assert_eq!(body["rate_limit_key"], "ip:198.51.100.7");
        assert_eq!(body["ips"][0], "198.51.100.7");
        assert_eq!(body["user_agent"], "curl/8.0");
        assert_eq!(body["headers"]["x_forwarded_for"], "198.51.100.7");
    }

    #[tokio::test]
    async fn test_concurrent_requests_admit_exactly_max() {
        let clock = ManualClock::default();
        let app = router(&limiters(5, 10, 10, &clock));

        let requests = (0..20).map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                app.oneshot(get_request("/api/public", &[])).await.unwrap().status()
            })
        });
        let statuses = futures::future::join_all(requests).await;

        let ok = statuses
            .iter()
            .filter(|s| *s.as_ref().unwrap() == StatusCode::OK)
            .count();
        assert_eq!(ok, 5);
    }
}
