//! API Module
//!
//! HTTP wiring for the response cache.
//!
//! # Endpoints
//! - `GET /events`, `GET /events/:id` - Cached sample resource reads
//! - `POST /events`, `PUT /events/:id`, `DELETE /events/:id` - Writes that invalidate
//! - `/admin/cache/*` - Admin inspection and purge
//! - `GET /health` - Health check endpoint

pub mod admin;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::{health_handler, AppState};
pub use routes::create_router;
