//! Key strategies: how a request is attributed to a rate limit bucket.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::key::{RateLimitKey, RequestAttributes};

/// Query parameter carrying the user id.
pub const USER_ID_QUERY: &str = "user_id";
/// Header carrying the user id.
pub const USER_ID_HEADER: &str = "X-User-ID";
/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Derives a [`RateLimitKey`] from a request.
///
/// Implementations must always return a non-empty key. When the
/// attributes they prefer are missing they fall back to the client IP
/// instead of failing. New strategies (tenant, organization, ...) are added
/// by implementing this trait; the limiter never needs to change.
pub trait KeyStrategy: Send + Sync + std::fmt::Debug {
    /// Derive the key for `request`.
    fn derive_key(&self, request: &RequestAttributes) -> RateLimitKey;
}

/// Keys every request by client IP: `ip:<client-ip>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpStrategy;

impl KeyStrategy for IpStrategy {
    fn derive_key(&self, request: &RequestAttributes) -> RateLimitKey {
        RateLimitKey::ip(&request.client_ip())
    }
}

/// Keys by user id: `user:<id>`.
///
/// The id comes from the `user_id` query parameter, then the `X-User-ID`
/// header. Anonymous traffic falls back to `ip:<client-ip>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStrategy;

impl KeyStrategy for UserStrategy {
    fn derive_key(&self, request: &RequestAttributes) -> RateLimitKey {
        match request
            .query(USER_ID_QUERY)
            .or_else(|| request.header(USER_ID_HEADER))
        {
            Some(user_id) => RateLimitKey::user(user_id),
            None => IpStrategy.derive_key(request),
        }
    }
}

/// Keys by API key: `api:<key>` from the `X-API-Key` header, falling back
/// to `ip:<client-ip>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyStrategy;

impl KeyStrategy for ApiKeyStrategy {
    fn derive_key(&self, request: &RequestAttributes) -> RateLimitKey {
        match request.header(API_KEY_HEADER) {
            Some(api_key) => RateLimitKey::api_key(api_key),
            None => IpStrategy.derive_key(request),
        }
    }
}

/// The built-in strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategyKind {
    Ip,
    User,
    ApiKey,
}

impl KeyStrategyKind {
    /// Build the strategy for this kind.
    pub fn build(self) -> Arc<dyn KeyStrategy> {
        match self {
            KeyStrategyKind::Ip => Arc::new(IpStrategy),
            KeyStrategyKind::User => Arc::new(UserStrategy),
            KeyStrategyKind::ApiKey => Arc::new(ApiKeyStrategy),
        }
    }
}
