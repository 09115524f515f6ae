//! Edge Cache - a platform-aware HTTP response cache
//!
//! Caches GET responses per route policy in front of an axum service,
//! backed by Redis (standalone or cluster), an in-process store, or
//! nothing at all, degrading to uncached responses when the backend fails.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use tasks::{spawn_cleanup_task, spawn_startup_probe};
