//! Rate limit enforcement middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::ratelimit::{ChainOutcome, Decision, LimiterChain, RequestAttributes};

/// Response header carrying the limit that applied to the request.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Response header carrying the requests left in the current window.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Response header carrying the seconds until the current window resets.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// JSON body of a 429 response.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    /// Always `Too Many Requests`
    pub error: &'static str,
    /// Names the limiter that rejected the request
    pub message: String,
}

/// Resolve the rate limiting attributes of an axum request.
pub fn request_attributes(request: &Request) -> RequestAttributes {
    let mut attrs = RequestAttributes::new();

    if let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        attrs = attrs.with_peer_addr(peer.ip());
    }

    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        attrs = attrs.with_forwarded_for_header(forwarded);
    }

    // Pairs keep their order so a repeated parameter resolves to its first value.
    if let Ok(Query(params)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        for (name, value) in params {
            attrs = attrs.with_query(name, value);
        }
    }

    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            attrs = attrs.with_header(name.as_str(), value);
        }
    }

    attrs
}

/// Check the request against `chain`; reject with 429 or pass it on with
/// rate limit headers attached.
pub async fn enforce(
    State(chain): State<Arc<LimiterChain>>,
    request: Request,
    next: Next,
) -> Response {
    let attrs = request_attributes(&request);

    match chain.check(&attrs) {
        ChainOutcome::Rejected { limiter, decision } => {
            warn!(
                limiter = %limiter,
                key = %decision.key,
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            rejection(&limiter, &decision)
        }
        outcome => {
            let mut response = next.run(request).await;
            if let Some(decision) = outcome.effective() {
                apply_headers(response.headers_mut(), decision);
            }
            response
        }
    }
}

fn rejection(limiter: &str, decision: &Decision) -> Response {
    let body = RejectionBody {
        error: "Too Many Requests",
        message: format!("{} rate limit exceeded. Please try again later.", limiter),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(ceil_secs(decision.retry_after()).max(1)),
    );
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(ceil_secs(decision.retry_after())),
    );
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
