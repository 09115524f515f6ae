//! Admin Handlers
//!
//! Mounted under `/admin/cache` behind [`admin_auth`](super::middleware::admin_auth).
//!
//! # Endpoints
//! - `GET /info` - Backend reachability, key count, namespace and stats
//! - `GET /keys?prefix&cursor&count` - One page of keys
//! - `GET /value?key` - Raw value, inferred type and remaining TTL
//! - `POST /purge` - Prefix delete with dry-run, batch and limit controls

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::info;

use super::handlers::AppState;
use crate::cache::{CacheInfo, KeyPage, PurgeReport, ValueInfo};
use crate::error::{ApiError, Result};
use crate::models::{KeysQuery, PurgeRequest, ValueQuery};

/// Handler for GET /admin/cache/info
pub async fn info_handler(State(state): State<AppState>) -> Json<CacheInfo> {
    Json(state.admin.info().await)
}

/// Handler for GET /admin/cache/keys
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Json<KeyPage> {
    let page = state
        .admin
        .list_keys(query.prefix.as_deref(), query.cursor.as_deref(), query.count)
        .await;
    Json(page)
}

/// Handler for GET /admin/cache/value
pub async fn value_handler(
    State(state): State<AppState>,
    Query(query): Query<ValueQuery>,
) -> Result<Json<ValueInfo>> {
    if query.key.is_empty() {
        return Err(ApiError::InvalidRequest("Key cannot be empty".into()));
    }
    Ok(Json(state.admin.get_value(&query.key).await))
}

/// Handler for POST /admin/cache/purge
pub async fn purge_handler(
    State(state): State<AppState>,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<PurgeReport>> {
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let report = state.admin.purge(&req.prefix, req.options()).await?;
    info!(
        prefix = %req.prefix,
        dry_run = report.dry_run,
        matched = report.matched,
        deleted = report.deleted,
        "admin purge"
    );
    Ok(Json(report))
}
