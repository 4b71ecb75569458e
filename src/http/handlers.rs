//! Demo endpoints behind the rate limiters.

use axum::extract::{Query, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::instrument;

use super::middleware::request_attributes;
use crate::ratelimit::{RateLimitKey, API_KEY_HEADER, USER_ID_QUERY};

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// `GET /api/public` - global limit only.
#[instrument]
pub async fn public_info() -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "This is a public endpoint with global rate limiting",
        "timestamp": timestamp(),
    }))
}

/// `GET /api/ip` - shows how the client address was resolved.
#[instrument(skip_all)]
pub async fn ip_info(request: Request) -> Json<Value> {
    let attrs = request_attributes(&request);
    let client_ip = attrs.client_ip();
    let header = |name: &str| attrs.header(name).unwrap_or_default().to_string();

    Json(json!({
        "status": "success",
        "message": "Your IP address information",
        "timestamp": timestamp(),
        "ip": attrs.peer_addr().map(|a| a.to_string()),
        "ips": attrs.forwarded_for(),
        "rate_limit_key": RateLimitKey::ip(&client_ip).as_str(),
        "client_ip": client_ip,
        "user_agent": header("User-Agent"),
        "headers": {
            "x_forwarded_for": header("X-Forwarded-For"),
            "x_real_ip": header("X-Real-IP"),
        },
    }))
}

/// `GET /api/user` - user-scoped limit.
#[instrument]
pub async fn user_info(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    // First occurrence only, matching the key the user limiter charged.
    let user_id = params
        .into_iter()
        .find(|(name, _)| name == USER_ID_QUERY)
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());

    Json(json!({
        "status": "success",
        "message": "This is a user endpoint with user-specific rate limiting",
        "timestamp": timestamp(),
        "user_id": user_id,
    }))
}

/// `GET /api/admin` - API-key-scoped limit; the key is required.
#[instrument(skip_all)]
pub async fn admin_info(request: Request) -> Response {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let Some(api_key) = api_key else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": "error",
                "message": "API key is required for admin endpoints",
            })),
        )
            .into_response();
    };

    // Only echo a prefix of the key.
    let prefix: String = api_key.chars().take(5).collect();

    Json(json!({
        "status": "success",
        "message": "This is an admin endpoint with admin-specific rate limiting",
        "timestamp": timestamp(),
        "api_key": format!("{}...", prefix),
    }))
    .into_response()
}
