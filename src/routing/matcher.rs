//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive, port ignored)
//! - Match path prefix (case-sensitive)
//! - Match method against an allow-list
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - The host comes from the request target when it is absolute (synthetic
//!   requests built from a subscription URL), otherwise from the Host header
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{Method, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Host of a request without its port, lowercased.
pub fn request_host(req: &Request<Body>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_lowercase());
    }
    let raw = req.headers().get("host").and_then(|h| h.to_str().ok())?;
    let host = match raw.rsplit_once(':') {
        // keep bracketed IPv6 literals intact
        Some((host, port)) if !port.contains(']') => host,
        _ => raw,
    };
    Some(host.trim_start_matches('[').trim_end_matches(']').to_lowercase())
}

/// Matches the request host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        request_host(req)
            .map(|h| h == self.expected_host)
            .unwrap_or(false)
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path().starts_with(&self.prefix)
    }
}

/// Matches the request method against an allow-list.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    /// Names that are not valid methods are dropped.
    pub fn new<S: AsRef<str>>(methods: &[S]) -> Self {
        Self {
            methods: methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_ref().to_uppercase().as_bytes()).ok())
                .collect(),
        }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.methods.is_empty() || self.methods.contains(req.method())
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        let req1 = Request::builder()
            .header("Host", "example.com:8080")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req1));

        let req2 = Request::builder()
            .header("Host", "EXAMPLE.COM")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req2)); // Case insensitive

        let req3 = Request::builder()
            .header("Host", "other.com")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&req3));
    }

    #[test]
    fn test_host_from_absolute_target() {
        let matcher = HostMatcher::new("localhost");
        let req = Request::builder()
            .uri("http://localhost:8080/foo")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req));
    }

    #[test]
    fn test_request_host_ipv6() {
        let req = Request::builder()
            .header("Host", "[::1]:8080")
            .body(Body::default())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("::1"));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        let req1 = Request::builder()
            .uri("http://example.com/api/v1")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req1));

        let req2 = Request::builder()
            .uri("http://example.com/images")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&req2));
    }

    #[test]
    fn test_method_matcher() {
        let matcher = MethodMatcher::new(&["get", "POST"]);
        let get = Request::builder().method("GET").body(Body::default()).unwrap();
        let put = Request::builder().method("PUT").body(Body::default()).unwrap();
        assert!(matcher.matches(&get));
        assert!(!matcher.matches(&put));

        let any = MethodMatcher::new::<&str>(&[]);
        assert!(any.matches(&put));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(PathPrefixMatcher::new("/api")),
            Box::new(MethodMatcher::new(&["POST"])),
        ]);
        let ok = Request::builder()
            .method("POST")
            .uri("/api/x")
            .body(Body::default())
            .unwrap();
        let wrong_method = Request::builder()
            .uri("/api/x")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&ok));
        assert!(!matcher.matches(&wrong_method));
        assert!(AndMatcher::default().matches(&wrong_method));
    }
}
