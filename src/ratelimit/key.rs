//! Rate limit keys and the request attributes they are derived from.

use std::collections::HashMap;
use std::net::IpAddr;

/// Client IP used when neither a forwarded address nor a peer address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A key that identifies which bucket a request is charged to.
///
/// Keys are namespaced (`ip:`, `user:`, `api:`) so strategies sharing a
/// store can never collide. A key is immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Create a key from a namespace and a value, e.g. `("user", "42")` -> `user:42`.
    pub fn new(namespace: &str, value: &str) -> Self {
        Self(format!("{}:{}", namespace, value))
    }

    /// Key for a client IP.
    pub fn ip(client_ip: &str) -> Self {
        Self::new("ip", client_ip)
    }

    /// Key for an identified user.
    pub fn user(user_id: &str) -> Self {
        Self::new("user", user_id)
    }

    /// Key for an API-key holder.
    pub fn api_key(api_key: &str) -> Self {
        Self::new("api", api_key)
    }

    /// Get the string form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The identifying attributes of an inbound request.
///
/// The HTTP layer resolves these from its own request type; the rate
/// limiting core never touches a transport object. Header names are
/// matched case-insensitively, query parameter names exactly.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    forwarded_for: Vec<String>,
    peer_addr: Option<IpAddr>,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
}

impl RequestAttributes {
    /// Create an empty set of attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport-level peer address.
    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Set the forwarded-for address list, client first.
    pub fn with_forwarded_for<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forwarded_for = addrs
            .into_iter()
            .map(|addr| {
                let addr: String = addr.into();
                addr.trim().to_string()
            })
            .filter(|addr| !addr.is_empty())
            .collect();
        self
    }

    /// Set the forwarded-for list from a raw `X-Forwarded-For` header value.
    pub fn with_forwarded_for_header(self, value: &str) -> Self {
        self.with_forwarded_for(value.split(','))
    }

    /// Add a query parameter. The first value of a repeated parameter wins.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(name.into()).or_insert_with(|| value.into());
        self
    }

    /// Add a header. The first value of a repeated header wins.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
        self
    }

    /// Get the forwarded-for address list.
    pub fn forwarded_for(&self) -> &[String] {
        &self.forwarded_for
    }

    /// Get the transport-level peer address.
    pub fn peer_addr(&self) -> Option<IpAddr> {
        self.peer_addr
    }

    /// Look up a query parameter. Empty values count as absent.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up a header. Empty values count as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Resolve the client IP.
    ///
    /// Prefers the first forwarded-for address, then the peer address,
    /// then [`UNKNOWN_CLIENT`]. Never empty.
    pub fn client_ip(&self) -> String {
        if let Some(first) = self.forwarded_for.first() {
            return first.clone();
        }
        match self.peer_addr {
            Some(addr) => addr.to_string(),
            None => UNKNOWN_CLIENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(RateLimitKey::ip("1.2.3.4").as_str(), "ip:1.2.3.4");
        assert_eq!(RateLimitKey::user("42").as_str(), "user:42");
        assert_eq!(RateLimitKey::api_key("abc123").as_str(), "api:abc123");
        assert_eq!(RateLimitKey::new("org", "acme").to_string(), "org:acme");
    }

    #[test]
    fn test_keys_in_different_namespaces_differ() {
        assert_ne!(RateLimitKey::user("42"), RateLimitKey::api_key("42"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let attrs = RequestAttributes::new()
            .with_peer_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_forwarded_for_header("203.0.113.7, 10.0.0.2");

        assert_eq!(attrs.forwarded_for(), ["203.0.113.7", "10.0.0.2"]);
        assert_eq!(attrs.client_ip(), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let attrs = RequestAttributes::new()
            .with_peer_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_forwarded_for_header(" , ");

        assert!(attrs.forwarded_for().is_empty());
        assert_eq!(attrs.client_ip(), "10.0.0.1");
    }

    #[test]
    fn test_client_ip_unknown_without_addresses() {
        assert_eq!(RequestAttributes::new().client_ip(), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let attrs = RequestAttributes::new().with_header("X-User-ID", "7");
        assert_eq!(attrs.header("x-user-id"), Some("7"));
        assert_eq!(attrs.header("X-USER-ID"), Some("7"));
    }

    #[test]
    fn test_repeated_values_keep_first() {
        let attrs = RequestAttributes::new()
            .with_query("user_id", "1")
            .with_query("user_id", "2")
            .with_header("X-API-Key", "first")
            .with_header("x-api-key", "second");
        assert_eq!(attrs.query("user_id"), Some("1"));
        assert_eq!(attrs.header("X-API-Key"), Some("first"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let attrs = RequestAttributes::new()
            .with_query("user_id", "")
            .with_header("X-API-Key", "");
        assert_eq!(attrs.query("user_id"), None);
        assert_eq!(attrs.header("X-API-Key"), None);
    }
}
