//! Events resource
//!
//! A small in-memory resource served through the cache stage. Reads are
//! cached; every successful write invalidates the item key and the list
//! family, computing keys with the same builder the read path uses.
//!
//! # Endpoints
//! - `GET /events` - List events (implicit key: path + sorted query)
//! - `GET /events/:id` - Fetch one event (template key `events:item:{id}`)
//! - `POST /events` - Create an event
//! - `PUT /events/:id` - Replace an event
//! - `DELETE /events/:id` - Delete an event

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    Json,
};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::handlers::AppState;
use crate::cache::{KeyError, PurgeOptions, RouteCachePolicy, RoutePolicies};
use crate::error::{ApiError, Result};
use crate::models::{Event, EventInput, EventListQuery};

/// Key template for a single event, shared by the read route and writers.
pub const EVENT_ITEM_KEY: &str = "events:item:{id}";

pub const EVENTS_PATH: &str = "/events";
pub const EVENT_PATH: &str = "/events/:id";

/// Cache policies for the events routes.
pub fn event_policies() -> std::result::Result<RoutePolicies, KeyError> {
    RoutePolicies::new()
        .register(EVENTS_PATH, RouteCachePolicy::new())?
        .register(EVENT_PATH, RouteCachePolicy::new().key_template(EVENT_ITEM_KEY))
}

/// 24 lowercase hex characters.
pub fn is_event_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// == Event Store ==
#[derive(Debug, Default)]
pub struct EventStore {
    events: RwLock<BTreeMap<String, Event>>,
    sequence: AtomicU64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let millis = Utc::now().timestamp_millis() as u64 & 0xffff_ffff_ffff;
        format!("{millis:012x}{:012x}", seq & 0xffff_ffff_ffff)
    }

    pub async fn list(&self, tag: Option<&str>, limit: Option<usize>) -> Vec<Event> {
        let events = self.events.read().await;
        events
            .values()
            .filter(|event| tag.map_or(true, |tag| event.tags.iter().any(|t| t == tag)))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Event> {
        self.events.read().await.get(id).cloned()
    }

    pub async fn insert(&self, input: EventInput) -> Event {
        let event = Event {
            id: self.next_id(),
            title: input.title,
            venue: input.venue,
            starts_at: input.starts_at,
            tags: input.tags,
            updated_at: Utc::now(),
        };
        self.events
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        event
    }

    pub async fn replace(&self, id: &str, input: EventInput) -> Option<Event> {
        let mut events = self.events.write().await;
        let event = events.get_mut(id)?;
        event.title = input.title;
        event.venue = input.venue;
        event.starts_at = input.starts_at;
        event.tags = input.tags;
        event.updated_at = Utc::now();
        Some(event.clone())
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.events.write().await.remove(id).is_some()
    }
}

// == Invalidation ==
/// Drops the cached item (when given) and every cached list variant.
pub async fn invalidate_events(state: &AppState, id: Option<&str>) {
    let keys = state.invalidator.keys();

    if let Some(id) = id {
        match keys.template_key(&Method::GET, EVENT_ITEM_KEY, &[("id", id)]) {
            Ok(key) => {
                state.invalidator.delete(&key).await;
            }
            Err(err) => warn!(id, error = %err, "event key could not be computed"),
        }
    }

    let family = keys.route_family_prefix(&Method::GET, EVENTS_PATH);
    let options = PurgeOptions {
        limit: Some(state.invalidator.ceiling()),
        ..Default::default()
    };
    match state.invalidator.delete_by_prefix(&family, options).await {
        Ok(report) => debug!(deleted = report.deleted, "event lists invalidated"),
        Err(err) => warn!(error = %err, "event lists not invalidated"),
    }
}

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("Event '{}' not found", id))
}

// == Handlers ==
/// Handler for GET /events
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventListQuery>,
) -> Json<Vec<Event>> {
    Json(state.events.list(query.tag.as_deref(), query.limit).await)
}

/// Handler for GET /events/:id
pub async fn get_event(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Event>> {
    if !is_event_id(&id) {
        return Err(not_found(&id));
    }
    state.events.get(&id).await.map(Json).ok_or_else(|| not_found(&id))
}

/// Handler for POST /events
pub async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> Result<(StatusCode, Json<Event>)> {
    if let Some(error_msg) = input.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }
    let event = state.events.insert(input).await;
    invalidate_events(&state, None).await;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Handler for PUT /events/:id
pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EventInput>,
) -> Result<Json<Event>> {
    if let Some(error_msg) = input.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }
    let event = state
        .events
        .replace(&id, input)
        .await
        .ok_or_else(|| not_found(&id))?;
    invalidate_events(&state, Some(&id)).await;
    Ok(Json(event))
}

/// Handler for DELETE /events/:id
pub async fn delete_event(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    if !state.events.remove(&id).await {
        return Err(not_found(&id));
    }
    invalidate_events(&state, Some(&id)).await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(title: &str, tags: &[&str]) -> EventInput {
        EventInput {
            title: title.to_string(),
            venue: None,
            starts_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_event_policies_register() {
        let policies = event_policies().unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies.get(EVENT_PATH).is_some());
    }

    #[test]
    fn test_event_id_format() {
        assert!(is_event_id("64f1a2b3c4d5e6f708192a3b"));
        assert!(!is_event_id("64F1A2B3C4D5E6F708192A3B"));
        assert!(!is_event_id("short"));
    }

    #[tokio::test]
    async fn test_store_generates_event_ids() {
        let store = EventStore::new();
        let a = store.insert(input("a", &[])).await;
        let b = store.insert(input("b", &[])).await;
        assert!(is_event_id(&a.id), "{} is not an event id", a.id);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_store_list_filters() {
        let store = EventStore::new();
        store.insert(input("a", &["music"])).await;
        store.insert(input("b", &["talk"])).await;
        store.insert(input("c", &["music"])).await;

        assert_eq!(store.list(None, None).await.len(), 3);
        assert_eq!(store.list(Some("music"), None).await.len(), 2);
        assert_eq!(store.list(None, Some(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_replace_and_remove() {
        let store = EventStore::new();
        let event = store.insert(input("a", &[])).await;

        let replaced = store.replace(&event.id, input("renamed", &[])).await.unwrap();
        assert_eq!(replaced.title, "renamed");
        assert!(store.replace("000000000000000000000000", input("x", &[])).await.is_none());

        assert!(store.remove(&event.id).await);
        assert!(!store.remove(&event.id).await);
        assert!(store.get(&event.id).await.is_none());
    }
}
