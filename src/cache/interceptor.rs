//! Cache Decision Interceptor Module
//!
//! The request pipeline stage that decides whether a request may be served
//! from the cache, serves hits, and stores the results of misses.
//!
//! The stage is transport agnostic: it takes a [`RequestDescriptor`] and a
//! downstream closure, and hands back an [`Intercepted`] outcome that the
//! HTTP layer turns into a response.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tracing::{debug, warn};

use super::adapter::CacheAdapter;
use super::keys::KeyBuilder;
use super::policy::{KeyStrategy, RouteCachePolicy};
use super::serialize::{SerializationGuard, Snapshot};
use super::stats::CacheStats;

// == Cache Metadata ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Observability data attached to every intercepted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMeta {
    pub status: CacheStatus,
    pub key: String,
    /// Remaining TTL on a hit, configured TTL on a miss
    pub ttl: Duration,
}

impl CacheMeta {
    pub fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }
}

// == Request Descriptor ==
/// What the interceptor needs to know about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Path parameters in route order
    pub path_params: Vec<(String, String)>,
    /// A credential header was present
    pub has_credentials: bool,
    /// The client asked for a fresh response
    pub force_refresh: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            path_params: Vec::new(),
            has_credentials: false,
            force_refresh: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.push((name.into(), value.into()));
        self
    }

    pub fn with_credentials(mut self) -> Self {
        self.has_credentials = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Path parameters followed by decoded query parameters.
    fn key_params(&self) -> Vec<(String, String)> {
        let query = self
            .query
            .as_deref()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect::<Vec<_>>())
            .unwrap_or_default();
        self.path_params.iter().cloned().chain(query).collect()
    }
}

// == Decision ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Pass straight through to the handler
    Bypass(&'static str),
    /// Look up `key`; on a miss store with `ttl`
    Cache { key: String, ttl: Duration },
}

/// Outcome of one intercepted request.
#[derive(Debug)]
pub enum Intercepted<R> {
    /// Stored bytes, returned verbatim
    Hit { body: Vec<u8>, meta: CacheMeta },
    /// The live handler result
    Miss { response: R, meta: CacheMeta },
    /// The handler result of an ineligible request
    Bypass(R),
}

/// Tells the downstream closure what will happen to its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// The result is a candidate for storing
    Store,
    /// The result goes back to the client untouched
    PassThrough,
}

impl<R> Intercepted<R> {
    pub fn meta(&self) -> Option<&CacheMeta> {
        match self {
            Intercepted::Hit { meta, .. } | Intercepted::Miss { meta, .. } => Some(meta),
            Intercepted::Bypass(_) => None,
        }
    }
}

// == Response Cache ==
#[derive(Clone)]
pub struct ResponseCache {
    adapter: CacheAdapter,
    keys: KeyBuilder,
    guard: SerializationGuard,
    default_ttl: Duration,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    // == Constructor ==
    /// Creates the interceptor.
    ///
    /// # Arguments
    /// * `adapter` - Backend façade shared with the admin service
    /// * `keys` - Namespaced key builder
    /// * `default_ttl` - TTL for routes without an override
    pub fn new(adapter: CacheAdapter, keys: KeyBuilder, default_ttl: Duration) -> Self {
        Self {
            adapter,
            keys,
            guard: SerializationGuard::default(),
            default_ttl,
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub fn adapter(&self) -> &CacheAdapter {
        &self.adapter
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // == Decision ==
    /// Decides whether `req` is served through the cache, and under which key.
    pub fn decide(&self, req: &RequestDescriptor, policy: &RouteCachePolicy) -> Decision {
        if req.method != Method::GET {
            return Decision::Bypass("method");
        }
        let Some(ttl) = policy.effective_ttl(self.default_ttl) else {
            return Decision::Bypass("route opted out");
        };
        if req.has_credentials && !policy.allow_with_auth {
            return Decision::Bypass("credentials present");
        }

        let key = match &policy.key {
            KeyStrategy::Implicit => {
                Ok(self.keys.implicit_key(&req.method, &req.path, req.query.as_deref()))
            }
            KeyStrategy::Explicit(key) => self.keys.explicit_key(&req.method, key),
            KeyStrategy::Template(template) => {
                self.keys.template_key(&req.method, template, &req.key_params())
            }
        };
        match key {
            Ok(key) => Decision::Cache { key, ttl },
            Err(err) => {
                warn!(path = %req.path, error = %err, "cache key could not be rendered, bypassing");
                Decision::Bypass("unrenderable key")
            }
        }
    }

    // == Intercept ==
    /// Runs one request through the cache.
    ///
    /// Backend failures behave exactly like misses; the handler result is
    /// always returned.
    pub async fn intercept<R, F, Fut>(
        &self,
        req: &RequestDescriptor,
        policy: &RouteCachePolicy,
        downstream: F,
    ) -> Intercepted<R>
    where
        R: Snapshot,
        F: FnOnce(Capture) -> Fut,
        Fut: Future<Output = R>,
    {
        let (key, ttl) = match self.decide(req, policy) {
            Decision::Cache { key, ttl } => (key, ttl),
            Decision::Bypass(reason) => {
                self.stats.record_bypass();
                debug!(cache = "response", outcome = "bypass", reason, path = %req.path);
                return Intercepted::Bypass(downstream(Capture::PassThrough).await);
            }
        };

        if !req.force_refresh {
            if let Some(body) = self.lookup(&key).await {
                let remaining = self.adapter.ttl_remaining(&key).await.unwrap_or_default();
                self.stats.record_hit();
                debug!(cache = "response", outcome = "hit", key = %key);
                return Intercepted::Hit {
                    body,
                    meta: CacheMeta {
                        status: CacheStatus::Hit,
                        key,
                        ttl: remaining,
                    },
                };
            }
        }

        self.stats.record_miss();
        debug!(cache = "response", outcome = "miss", key = %key, forced = req.force_refresh);
        let response = downstream(Capture::Store).await;
        self.store(&key, &response, ttl).await;

        Intercepted::Miss {
            response,
            meta: CacheMeta {
                status: CacheStatus::Miss,
                key,
                ttl,
            },
        }
    }

    async fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let bytes = self.adapter.get(key).await?;
        match self.guard.decode(&bytes) {
            Ok(_) => Some(bytes),
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable cache entry");
                None
            }
        }
    }

    // Encodes synchronously so the returned future does not borrow `response`
    // (captured responses are not `Sync`, and the future must be `Send`).
    fn store<'a, R: Snapshot>(
        &'a self,
        key: &'a str,
        response: &R,
        ttl: Duration,
    ) -> impl Future<Output = ()> + 'a {
        let encoded = match response.plain_data() {
            Ok(Some(value)) => Some(self.guard.encode(&self.guard.sanitize(value))),
            Ok(None) => {
                debug!(cache = "response", key, "response not cacheable, skipping store");
                None
            }
            Err(err) => Some(Err(err)),
        };

        async move {
            let Some(encoded) = encoded else {
                return;
            };
            match encoded {
                Ok(bytes) => {
                    if self.adapter.set(key, &bytes, ttl).await {
                        self.stats.record_store();
                    } else {
                        self.stats.record_store_failure();
                    }
                }
                Err(err) => {
                    warn!(key, error = %err, "response could not be serialized, not cached");
                    self.stats.record_store_failure();
                }
            }
        }
    }
}
