//! Cross-origin admission.

use std::collections::HashSet;

use axum::http::{header, HeaderName, Method};
use once_cell::sync::Lazy;
use regex::Regex;

/// Development origins: plain-http localhost or loopback, optional port, no path.
///
/// The port class is ASCII-only; `\d` would accept non-ASCII digits.
static LOCAL_ORIGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^http://(localhost|127\.0\.0\.1)(:[0-9]+)?$").expect("valid local origin pattern")
});

/// Methods advertised to allowed origins.
pub const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Request headers advertised to allowed origins.
pub const ALLOWED_HEADERS: [HeaderName; 2] = [header::CONTENT_TYPE, header::AUTHORIZATION];

/// Operator-configured origins permitted beyond the local development exemption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    origins: HashSet<String>,
}

impl AllowList {
    /// Parse a comma-separated list, trimming entries and dropping empties.
    pub fn parse(raw: &str) -> Self {
        let origins = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { origins }
    }

    /// Exact, case-sensitive membership.
    pub fn contains(&self, origin: &str) -> bool {
        self.origins.contains(origin)
    }

    /// Number of configured origins.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// True when no origins are configured.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Configured origins, sorted for display.
    pub fn sorted(&self) -> Vec<&str> {
        let mut list: Vec<&str> = self.origins.iter().map(String::as_str).collect();
        list.sort_unstable();
        list
    }
}

/// Outcome of an origin check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// The request may proceed and receive CORS headers.
    Allowed,
    /// The request must be refused.
    Denied {
        /// The offending origin, echoed back to the client.
        origin: String,
    },
}

impl OriginDecision {
    /// True for [`OriginDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, OriginDecision::Allowed)
    }
}

/// Decides which origins may make cross-origin requests.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allow_list: AllowList,
}

impl OriginPolicy {
    /// Create a policy over the given allow-list.
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// The configured allow-list.
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Check an `Origin` header value.
    ///
    /// Requests without an origin (same-origin navigation, curl, server-to-server)
    /// are always allowed.
    pub fn check(&self, origin: Option<&str>) -> OriginDecision {
        match origin {
            None => OriginDecision::Allowed,
            Some(origin) if self.permits(origin) => OriginDecision::Allowed,
            Some(origin) => OriginDecision::Denied {
                origin: origin.to_string(),
            },
        }
    }

    /// True when a present origin is local or allow-listed.
    pub fn permits(&self, origin: &str) -> bool {
        is_local_origin(origin) || self.allow_list.contains(origin)
    }
}

/// True for `http://localhost[:port]` and `http://127.0.0.1[:port]`.
pub fn is_local_origin(origin: &str) -> bool {
    LOCAL_ORIGIN.is_match(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(raw: &str) -> OriginPolicy {
        OriginPolicy::new(AllowList::parse(raw))
    }

    #[test]
    fn absent_origin_is_allowed() {
        assert_eq!(policy("").check(None), OriginDecision::Allowed);
    }

    #[test]
    fn local_origins_are_allowed_without_allow_list() {
        let p = policy("");
        for origin in [
            "http://localhost",
            "http://localhost:3000",
            "http://127.0.0.1",
            "http://127.0.0.1:5173",
        ] {
            assert!(p.check(Some(origin)).is_allowed(), "{origin} should be allowed");
        }
    }

    #[test]
    fn local_lookalikes_are_denied() {
        let p = policy("");
        for origin in [
            "https://localhost:3000",
            "http://localhost:3000/",
            "http://localhost:3000/app",
            "http://localhost:",
            "http://localhost.evil.example",
            "http://127.0.0.2",
            "http://LOCALHOST",
            "http://localhost:٣٠٠٠",
            "null",
            "",
        ] {
            assert_eq!(
                p.check(Some(origin)),
                OriginDecision::Denied {
                    origin: origin.to_string()
                },
                "{origin} should be denied"
            );
        }
    }

    #[test]
    fn allow_list_membership_is_exact() {
        let p = policy("https://example.com");

        assert!(p.check(Some("https://example.com")).is_allowed());
        assert!(!p.check(Some("http://example.com")).is_allowed());
        assert!(!p.check(Some("https://example.com:443")).is_allowed());
        assert!(!p.check(Some("https://Example.com")).is_allowed());
        assert!(!p.check(Some("https://example.com/")).is_allowed());
    }

    #[test]
    fn unknown_origin_is_denied_with_echo() {
        let p = policy("http://good.example");

        assert_eq!(
            p.check(Some("http://evil.example")),
            OriginDecision::Denied {
                origin: "http://evil.example".to_string()
            }
        );
    }

    #[test]
    fn allow_list_parsing_trims_and_drops_empties() {
        let list = AllowList::parse(" https://a.example , ,https://b.example,,");

        assert_eq!(list.len(), 2);
        assert_eq!(list.sorted(), vec!["https://a.example", "https://b.example"]);
        assert!(AllowList::parse("").is_empty());
        assert!(AllowList::parse(" , ").is_empty());
    }
}
