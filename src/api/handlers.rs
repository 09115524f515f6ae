//! API Handlers
//!
//! Shared application state and the health endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};

use super::events::{event_policies, EventStore};
use crate::cache::{
    AdminService, CacheAdapter, Invalidator, KeyBuilder, KeyError, ResponseCache, RoutePolicies,
};
use crate::config::Config;
use crate::models::HealthResponse;

/// Application state shared across all handlers and middleware.
///
/// Every member is a cheap handle; cloning the state clones handles, not data.
#[derive(Clone)]
pub struct AppState {
    /// Decision interceptor for GET routes
    pub cache: ResponseCache,
    /// Route path to cache policy table, fixed at start-up
    pub policies: Arc<RoutePolicies>,
    /// Write-path invalidation
    pub invalidator: Invalidator,
    /// Admin inspection and purge
    pub admin: AdminService,
    /// Token required by the admin surface; `None` locks it
    pub admin_token: Option<Arc<str>>,
    /// Sample resource storage
    pub events: Arc<EventStore>,
}

impl AppState {
    /// Wires the cache components around one adapter.
    ///
    /// Fails when the namespace or a registered route key is malformed.
    pub fn new(adapter: CacheAdapter, config: &Config) -> Result<Self, KeyError> {
        let keys = KeyBuilder::new(config.key_prefix.as_str(), config.environment.as_str())?;
        let cache = ResponseCache::new(adapter.clone(), keys.clone(), config.default_ttl());
        let invalidator = Invalidator::new(adapter.clone(), keys.clone(), config.purge_ceiling);
        let admin = AdminService::new(
            adapter,
            invalidator.clone(),
            keys,
            config.default_ttl(),
            cache.stats().clone(),
        );

        Ok(Self {
            cache,
            policies: Arc::new(event_policies()?),
            invalidator,
            admin,
            admin_token: config.admin_token.as_deref().map(Arc::from),
            events: Arc::new(EventStore::new()),
        })
    }
}

/// Handler for GET /health
///
/// Reports process liveness and the last known cache status. Never touches
/// the backend.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let adapter = state.cache.adapter();
    Json(HealthResponse::healthy(adapter.health(), adapter.kind()))
}
