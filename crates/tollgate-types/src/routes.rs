//! Route patterns: turning a user's route table into an ordered matcher.
//!
//! Sellers declare protected routes as `"PATH"` or `"METHOD PATH"` keys:
//!
//! ```text
//! "/weather"          any method, exact path
//! "GET /reports/*"    GET, one wildcard segment
//! "POST /api/*"       POST, everything under /api (trailing wildcard)
//! ```
//!
//! A `*` segment matches exactly one path segment; a trailing `/*` matches
//! zero or more. Compiled patterns are ordered by specificity — exact
//! patterns first, then single-segment wildcards, then trailing wildcards —
//! with document order preserved inside each class. The first pattern that
//! matches wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::chain::ChainId;
use crate::price::Price;

/// One accepted payment option on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOption {
    /// Payment scheme, "exact" unless the route says otherwise.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Network this option settles on.
    pub network: ChainId,
    /// Recipient address in the network's native format.
    pub pay_to: String,
    /// The price, as money or an explicit asset amount.
    pub price: Price,
}

fn default_scheme() -> String {
    "exact".to_string()
}

/// Per-route configuration: what the route costs and how it behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Accepted payment options, one requirement each. Non-empty.
    pub accepts: Vec<PriceOption>,
    /// Human-readable description for the 402 offer.
    #[serde(default)]
    pub description: String,
    /// MIME type of the protected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// JSON schema of the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Upper bound on verify+settle duration, seconds.
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    /// Extension declarations merged into each requirement's `extra`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
    /// Settle before invoking the handler. Required for streaming handlers
    /// whose response cannot be buffered until settlement.
    #[serde(default)]
    pub settle_first: bool,
}

fn default_max_timeout_seconds() -> u64 {
    300
}

/// The seller's full route table, keyed by `"PATH"` or `"METHOD PATH"`.
pub type RoutesConfig = BTreeMap<String, RouteConfig>;

/// Errors from compiling a route table.
#[derive(Debug, thiserror::Error)]
pub enum RoutePatternError {
    /// The route key is empty or has more than two space-separated parts.
    #[error("malformed route key {0:?}")]
    MalformedKey(String),
    /// The path does not start with `/`.
    #[error("route path must start with '/': {0:?}")]
    RelativePath(String),
    /// A route declared no accepted payment options.
    #[error("route {0:?} accepts no payment options")]
    NoAccepts(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// A compiled route pattern plus its configuration.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    /// Uppercased HTTP method, or `*` for any.
    pub method: String,
    segments: Vec<Segment>,
    trailing: bool,
    /// The route's configuration.
    pub config: RouteConfig,
}

impl RoutePattern {
    fn parse(key: &str, config: RouteConfig) -> Result<Self, RoutePatternError> {
        let mut parts = key.split_whitespace();
        let (method, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(path), None, _) => ("*".to_string(), path),
            (Some(method), Some(path), None) => (method.to_ascii_uppercase(), path),
            _ => return Err(RoutePatternError::MalformedKey(key.to_string())),
        };
        if !path.starts_with('/') {
            return Err(RoutePatternError::RelativePath(path.to_string()));
        }
        if config.accepts.is_empty() {
            return Err(RoutePatternError::NoAccepts(key.to_string()));
        }

        let (path, trailing) = match path.strip_suffix("/*") {
            Some(head) => (head, true),
            None => (path, false),
        };
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Ok(RoutePattern {
            method,
            segments,
            trailing,
            config,
        })
    }

    /// Specificity class: exact < single-segment wildcards < trailing.
    fn specificity(&self) -> (bool, usize) {
        let wildcards = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard))
            .count();
        (self.trailing, wildcards)
    }

    /// Whether this pattern matches a request path and method.
    pub fn matches(&self, path: &str, method: &str) -> bool {
        if self.method != "*" && !self.method.eq_ignore_ascii_case(method) {
            return false;
        }
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if self.trailing {
            if path_segments.len() < self.segments.len() {
                return false;
            }
        } else if path_segments.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(path_segments.iter())
            .all(|(pattern, actual)| match pattern {
                Segment::Literal(expected) => expected == actual,
                Segment::Wildcard => true,
            })
    }
}

/// An ordered set of compiled route patterns.
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    patterns: Vec<RoutePattern>,
}

impl RouteSet {
    /// Compiles a route table into an ordered matcher.
    pub fn compile(routes: &RoutesConfig) -> Result<Self, RoutePatternError> {
        let mut patterns = routes
            .iter()
            .map(|(key, config)| RoutePattern::parse(key, config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        // Stable: document order survives within each specificity class.
        patterns.sort_by_key(|p| p.specificity());
        Ok(RouteSet { patterns })
    }

    /// Finds the first pattern matching `(path, method)`.
    pub fn matches(&self, path: &str, method: &str) -> Option<&RoutePattern> {
        self.patterns.iter().find(|p| p.matches(path, method))
    }

    /// All compiled patterns in match order.
    pub fn patterns(&self) -> &[RoutePattern] {
        &self.patterns
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl FromStr for RouteSet {
    type Err = serde_json::Error;

    /// Compiles a route table from its JSON form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let routes: RoutesConfig = serde_json::from_str(s)?;
        RouteSet::compile(&routes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RouteConfig {
        RouteConfig {
            accepts: vec![PriceOption {
                scheme: "exact".to_string(),
                network: ChainId::new("eip155", "84532"),
                pay_to: "0xBAc6".to_string(),
                price: Price::try_from("$0.10").unwrap(),
            }],
            description: String::new(),
            mime_type: None,
            output_schema: None,
            max_timeout_seconds: 300,
            extensions: BTreeMap::new(),
            settle_first: false,
        }
    }

    fn route_set(keys: &[&str]) -> RouteSet {
        let routes: RoutesConfig = keys
            .iter()
            .map(|k| (k.to_string(), config()))
            .collect();
        RouteSet::compile(&routes).unwrap()
    }

    #[test]
    fn method_defaults_to_any() {
        let routes = route_set(&["/a"]);
        assert!(routes.matches("/a", "GET").is_some());
        assert!(routes.matches("/a", "POST").is_some());
        assert!(routes.matches("/b", "GET").is_none());
    }

    #[test]
    fn method_is_honored() {
        let routes = route_set(&["GET /a"]);
        assert!(routes.matches("/a", "GET").is_some());
        assert!(routes.matches("/a", "get").is_some());
        assert!(routes.matches("/a", "POST").is_none());
    }

    #[test]
    fn interior_wildcard_matches_one_segment() {
        let routes = route_set(&["GET /reports/*/summary"]);
        assert!(routes.matches("/reports/daily/summary", "GET").is_some());
        assert!(routes.matches("/reports/summary", "GET").is_none());
        assert!(routes.matches("/reports/a/b/summary", "GET").is_none());
    }

    #[test]
    fn trailing_wildcard_matches_zero_or_more() {
        let routes = route_set(&["/api/*"]);
        assert!(routes.matches("/api", "GET").is_some());
        assert!(routes.matches("/api/v1", "GET").is_some());
        assert!(routes.matches("/api/v1/items/3", "GET").is_some());
        assert!(routes.matches("/other", "GET").is_none());
    }

    #[test]
    fn exact_sorts_before_wildcards() {
        let routes = route_set(&["/api/*", "/api/health"]);
        let matched = routes.matches("/api/health", "GET").unwrap();
        assert!(!matched.config.accepts.is_empty());
        // The exact pattern won even though the trailing wildcard also
        // qualifies and sorts earlier alphabetically.
        assert_eq!(matched.specificity(), (false, 0));
    }

    #[test]
    fn interior_wildcard_sorts_before_trailing() {
        let routes = route_set(&["/files/*", "/files/*/meta"]);
        // Both qualify for "/files/report/meta"; the interior-wildcard
        // pattern is more specific and must win.
        let matched = routes.matches("/files/report/meta", "GET").unwrap();
        assert_eq!(matched.specificity(), (false, 1));
    }

    #[test]
    fn at_most_one_route_matches() {
        let routes = route_set(&["GET /a", "POST /a"]);
        let matched = routes.matches("/a", "GET").unwrap();
        assert_eq!(matched.method, "GET");
    }

    #[test]
    fn malformed_keys_rejected() {
        let mut routes = RoutesConfig::new();
        routes.insert("GET /a /b".to_string(), config());
        assert!(RouteSet::compile(&routes).is_err());

        let mut routes = RoutesConfig::new();
        routes.insert("GET a".to_string(), config());
        assert!(RouteSet::compile(&routes).is_err());
    }

    #[test]
    fn empty_accepts_rejected() {
        let mut cfg = config();
        cfg.accepts.clear();
        let mut routes = RoutesConfig::new();
        routes.insert("/a".to_string(), cfg);
        assert!(RouteSet::compile(&routes).is_err());
    }
}
