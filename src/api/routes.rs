//! API Routes
//!
//! Configures the Axum router: cached resource routes, the admin surface
//! and the health endpoint.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::admin::{info_handler, keys_handler, purge_handler, value_handler};
use super::events::{
    create_event, delete_event, get_event, list_events, update_event, EVENTS_PATH, EVENT_PATH,
};
use super::handlers::{health_handler, AppState};
use super::middleware::{admin_auth, response_cache};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /events`, `POST /events` - Sample resource collection
/// - `GET|PUT|DELETE /events/:id` - Sample resource item
/// - `GET /admin/cache/{info,keys,value}`, `POST /admin/cache/purge` - Admin surface
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - Response cache: per route, GET only, driven by the registered policies
/// - Admin auth: bearer or `X-Admin-Token`, admin routes only
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Cached resource routes; route_layer so the matched path is known
    let resources = Router::new()
        .route(EVENTS_PATH, get(list_events).post(create_event))
        .route(
            EVENT_PATH,
            get(get_event).put(update_event).delete(delete_event),
        )
        .route_layer(from_fn_with_state(state.clone(), response_cache));

    let admin = Router::new()
        .route("/info", get(info_handler))
        .route("/keys", get(keys_handler))
        .route("/value", get(value_handler))
        .route("/purge", post(purge_handler))
        .route_layer(from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .merge(resources)
        .nest("/admin/cache", admin)
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheAdapter;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let state = AppState::new(CacheAdapter::disabled(), &Config::default()).unwrap();
        create_router(state)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/cache/info")
                    .header("x-admin-token", "anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_events_list_with_disabled_cache() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
