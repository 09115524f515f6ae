//! Request and Response models for the HTTP API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{EventInput, EventListQuery, KeysQuery, PurgeRequest, ValueQuery};
pub use responses::{CacheHealth, ErrorResponse, Event, HealthResponse};
