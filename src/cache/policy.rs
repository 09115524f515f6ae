//! Route-level cache configuration.
//!
//! Policies are registered once at start-up against the router's route
//! paths (`/events/:id`) and looked up by the matched path per request.

use std::collections::HashMap;
use std::time::Duration;

use super::keys::{validate_explicit_key, validate_template, KeyError};

// == Cache TTL ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTtl {
    /// Use the global default TTL
    #[default]
    Default,
    /// Use a route specific TTL
    Fixed(Duration),
    /// Never cache this route
    Disabled,
}

// == Key Strategy ==
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Path plus sorted query string
    #[default]
    Implicit,
    /// A literal discriminator shared by every request to the route
    Explicit(String),
    /// A discriminator rendered from path, then query, parameters
    Template(String),
}

// == Route Cache Policy ==
/// Per-route cache settings. The default caches GETs with the global TTL
/// and an implicit key, and skips requests that carry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCachePolicy {
    pub ttl: CacheTtl,
    pub key: KeyStrategy,
    pub allow_with_auth: bool,
    pub bypass: bool,
}

impl RouteCachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = CacheTtl::Fixed(ttl);
        self
    }

    pub fn no_ttl(mut self) -> Self {
        self.ttl = CacheTtl::Disabled;
        self
    }

    pub fn explicit_key(mut self, key: impl Into<String>) -> Self {
        self.key = KeyStrategy::Explicit(key.into());
        self
    }

    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.key = KeyStrategy::Template(template.into());
        self
    }

    pub fn allow_with_auth(mut self) -> Self {
        self.allow_with_auth = true;
        self
    }

    pub fn bypass(mut self) -> Self {
        self.bypass = true;
        self
    }

    /// Rejects explicit keys and templates that would break the key layout.
    pub fn validate(&self) -> Result<(), KeyError> {
        match &self.key {
            KeyStrategy::Implicit => Ok(()),
            KeyStrategy::Explicit(key) => validate_explicit_key(key),
            KeyStrategy::Template(template) => validate_template(template),
        }
    }

    /// TTL to store with, or `None` when the route must not be cached.
    pub fn effective_ttl(&self, default: Duration) -> Option<Duration> {
        if self.bypass {
            return None;
        }
        let ttl = match self.ttl {
            CacheTtl::Default => default,
            CacheTtl::Fixed(ttl) => ttl,
            CacheTtl::Disabled => return None,
        };
        (!ttl.is_zero()).then_some(ttl)
    }
}

// == Route Policies ==
/// Lookup table from route path to policy.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicies {
    routes: HashMap<String, RouteCachePolicy>,
}

impl RoutePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy for a route path, validating its key strategy.
    ///
    /// # Arguments
    /// * `route` - The path as registered on the router, e.g. `/events/:id`
    /// * `policy` - Settings for GET requests matched to that path
    pub fn register(
        mut self,
        route: impl Into<String>,
        policy: RouteCachePolicy,
    ) -> Result<Self, KeyError> {
        policy.validate()?;
        self.routes.insert(route.into(), policy);
        Ok(self)
    }

    pub fn get(&self, route: &str) -> Option<&RouteCachePolicy> {
        self.routes.get(route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(60);

    #[test]
    fn test_default_policy() {
        let policy = RouteCachePolicy::new();
        assert_eq!(policy.effective_ttl(DEFAULT), Some(DEFAULT));
        assert!(!policy.allow_with_auth);
        assert!(!policy.bypass);
        assert_eq!(policy.key, KeyStrategy::Implicit);
    }

    #[test]
    fn test_ttl_override() {
        let policy = RouteCachePolicy::new().ttl(Duration::from_millis(2000));
        assert_eq!(policy.effective_ttl(DEFAULT), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_disabled_and_bypass_have_no_ttl() {
        assert_eq!(RouteCachePolicy::new().no_ttl().effective_ttl(DEFAULT), None);
        assert_eq!(RouteCachePolicy::new().bypass().effective_ttl(DEFAULT), None);
        assert_eq!(
            RouteCachePolicy::new().ttl(Duration::ZERO).effective_ttl(DEFAULT),
            None
        );
    }

    #[test]
    fn test_registration_validates_keys() {
        let ok = RoutePolicies::new()
            .register("/events", RouteCachePolicy::new().explicit_key("evt:list:v1"))
            .and_then(|p| {
                p.register("/events/:id", RouteCachePolicy::new().key_template("events:item:{id}"))
            })
            .unwrap();
        assert_eq!(ok.len(), 2);
        assert!(ok.get("/events/:id").is_some());
        assert!(ok.get("/missing").is_none());

        let bad = RoutePolicies::new().register("/x", RouteCachePolicy::new().explicit_key("a b"));
        assert!(matches!(bad, Err(KeyError::Malformed { .. })));

        let bad = RoutePolicies::new().register("/x", RouteCachePolicy::new().key_template("x:{"));
        assert!(bad.is_err());
    }
}
