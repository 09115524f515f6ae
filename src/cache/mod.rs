//! Cache Module
//!
//! The response cache core: backend façade, health, key construction,
//! route policies, the decision interceptor, invalidation and admin
//! operations.

mod adapter;
mod admin;
mod health;
mod interceptor;
mod invalidate;
mod keys;
mod policy;
mod serialize;
mod stats;


// Re-export public types
pub use adapter::CacheAdapter;
pub use admin::{inspect_value, AdminService, CacheInfo, KeyPage, ValueInfo, ValueKind};
pub use health::{BackendHealth, HealthStatus};
pub use interceptor::{
    Capture, CacheMeta, CacheStatus, Decision, Intercepted, RequestDescriptor, ResponseCache,
};
pub use invalidate::{
    Invalidator, PurgeError, PurgeOptions, PurgeReport, DEFAULT_BATCH_SIZE, DRY_RUN_SAMPLE,
    MAX_BATCH_SIZE,
};
pub use keys::{
    canonical_query, normalize_path, render_template, validate_explicit_key, validate_template,
    KeyBuilder, KeyError, HTTP_SCOPE, MAX_EXPLICIT_KEY_LENGTH,
};
pub use policy::{CacheTtl, KeyStrategy, RouteCachePolicy, RoutePolicies};
pub use serialize::{SerializationError, SerializationGuard, Snapshot};
pub use stats::{CacheStats, StatsSnapshot};
