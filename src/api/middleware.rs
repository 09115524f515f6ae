//! HTTP middleware: the response cache stage and admin authentication.

use std::future;

use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, RawPathParams, Request, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        response, HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::handlers::AppState;
use crate::cache::{
    CacheMeta, Capture, Intercepted, RequestDescriptor, SerializationError, Snapshot,
};
use crate::error::ApiError;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");
pub const X_ADMIN_TOKEN: HeaderName = HeaderName::from_static("x-admin-token");

/// Largest response body the cache stage will buffer.
const MAX_BUFFERED_BODY: usize = 4 * 1024 * 1024;

// == Captured Response ==
/// A downstream response, with its body collected in memory when it may be
/// stored.
pub enum CapturedResponse {
    /// `200 OK` JSON that fit under the buffer limit
    Buffered { parts: response::Parts, body: Bytes },
    /// Returned to the client as the handler produced it
    Streamed(Response),
}

impl CapturedResponse {
    /// Buffers storable responses. Anything else, including bodies that turn
    /// out larger than [`MAX_BUFFERED_BODY`], is handed back intact.
    async fn collect(response: Response) -> Self {
        if !is_storable(&response) {
            return Self::Streamed(response);
        }

        let (parts, body) = response.into_parts();
        let mut data = body.into_data_stream();
        let mut chunks: Vec<Bytes> = Vec::new();
        let mut size = 0usize;

        while let Some(chunk) = data.next().await {
            match chunk {
                Ok(chunk) => {
                    size += chunk.len();
                    chunks.push(chunk);
                    if size > MAX_BUFFERED_BODY {
                        debug!(size, "response body over the buffer limit, not cached");
                        return Self::Streamed(replay(parts, chunks, data));
                    }
                }
                Err(err) => {
                    warn!(error = %err, "response body failed while buffering");
                    let failed = stream::once(future::ready(Err(err)));
                    return Self::Streamed(replay(parts, chunks, failed));
                }
            }
        }

        Self::Buffered {
            parts,
            body: Bytes::from(chunks.concat()),
        }
    }
}

/// `200 OK` JSON whose declared length, if any, fits the buffer.
fn is_storable(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }
    let headers = response.headers();
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    is_json && declared.map_or(true, |len| len <= MAX_BUFFERED_BODY)
}

/// Rebuilds a response from the chunks already read and the unread rest.
fn replay<S>(parts: response::Parts, chunks: Vec<Bytes>, rest: S) -> Response
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Send + 'static,
{
    let read = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
    Response::from_parts(parts, Body::from_stream(read.chain(rest)))
}

impl Snapshot for CapturedResponse {
    fn plain_data(&self) -> Result<Option<Value>, SerializationError> {
        match self {
            Self::Buffered { body, .. } => serde_json::from_slice(body)
                .map(Some)
                .map_err(SerializationError::Decode),
            Self::Streamed(_) => Ok(None),
        }
    }
}

impl IntoResponse for CapturedResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Buffered { parts, body } => Response::from_parts(parts, Body::from(body)),
            Self::Streamed(response) => response,
        }
    }
}

// == Request Descriptor ==
fn describe(parts: &Parts, path_params: Vec<(String, String)>) -> RequestDescriptor {
    RequestDescriptor {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        path_params,
        has_credentials: parts.headers.contains_key(AUTHORIZATION),
        force_refresh: wants_fresh(&parts.headers),
    }
}

/// `Cache-Control: no-cache` asks for a regenerated response.
fn wants_fresh(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
}

fn apply_meta(response: &mut Response, meta: &CacheMeta) {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(meta.status.as_str()));
    if let Ok(key) = HeaderValue::from_str(&meta.key) {
        headers.insert(X_CACHE_KEY, key);
    }
    headers.insert(X_CACHE_TTL, HeaderValue::from(meta.ttl_ms()));
}

// == Response Cache Stage ==
/// Serves GET requests on routes with a registered policy through the cache.
///
/// Must be installed with `route_layer` so the matched route is known.
pub async fn response_cache(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }
    let policy = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|matched| state.policies.get(matched.as_str()))
        .cloned();
    let Some(policy) = policy else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let path_params = match parts.extract::<RawPathParams>().await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let descriptor = describe(&parts, path_params);
    let request = Request::from_parts(parts, body);

    let outcome = state
        .cache
        .intercept(&descriptor, &policy, move |capture| async move {
            let response = next.run(request).await;
            match capture {
                Capture::Store => CapturedResponse::collect(response).await,
                Capture::PassThrough => CapturedResponse::Streamed(response),
            }
        })
        .await;

    match outcome {
        Intercepted::Hit { body, meta } => {
            let mut response =
                (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response();
            apply_meta(&mut response, &meta);
            response
        }
        Intercepted::Miss { response, meta } => {
            let mut response = response.into_response();
            apply_meta(&mut response, &meta);
            response
        }
        Intercepted::Bypass(response) => response.into_response(),
    }
}

// == Admin Authentication ==
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim);
    bearer.or_else(|| {
        headers
            .get(X_ADMIN_TOKEN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    })
}

/// Rejects admin requests without the configured token before any backend
/// call is made. With no token configured every request is rejected.
pub async fn admin_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!("admin request rejected: no admin token configured");
        return ApiError::Unauthorized("admin access is not configured".into()).into_response();
    };

    let authorized = presented_token(request.headers())
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);
    if !authorized {
        debug!(path = %request.uri().path(), "admin request rejected");
        return ApiError::Unauthorized("invalid admin credentials".into()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn test_wants_fresh() {
        let mut headers = HeaderMap::new();
        assert!(!wants_fresh(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(wants_fresh(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(!wants_fresh(&headers));
    }

    #[test]
    fn test_presented_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_token(&headers), None);

        headers.insert(X_ADMIN_TOKEN, HeaderValue::from_static("secret"));
        assert_eq!(presented_token(&headers), Some("secret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer other"));
        assert_eq!(presented_token(&headers), Some("other"));
    }

    #[test]
    fn test_describe_request() {
        let (parts, _) = HttpRequest::builder()
            .uri("/events?b=1&a=2")
            .header(AUTHORIZATION, "Bearer t")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        let descriptor = describe(&parts, vec![("id".into(), "x".into())]);

        assert_eq!(descriptor.method, Method::GET);
        assert_eq!(descriptor.path, "/events");
        assert_eq!(descriptor.query.as_deref(), Some("b=1&a=2"));
        assert!(descriptor.has_credentials);
        assert!(!descriptor.force_refresh);
        assert_eq!(descriptor.path_params.len(), 1);
    }

    #[tokio::test]
    async fn test_only_ok_json_is_plain_data() {
        let ok = CapturedResponse::collect(
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], r#"{"a":1}"#).into_response(),
        )
        .await;
        assert!(matches!(ok, CapturedResponse::Buffered { .. }));
        assert!(ok.plain_data().unwrap().is_some());

        let text = CapturedResponse::collect((StatusCode::OK, "plain").into_response()).await;
        assert!(matches!(text, CapturedResponse::Streamed(_)));
        assert!(text.plain_data().unwrap().is_none());

        let missing = CapturedResponse::collect(
            (StatusCode::NOT_FOUND, [(CONTENT_TYPE, "application/json")], "{}").into_response(),
        )
        .await;
        assert!(missing.plain_data().unwrap().is_none());

        let broken = CapturedResponse::collect(
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], "{oops").into_response(),
        )
        .await;
        assert!(broken.plain_data().is_err());
    }

    fn oversized_json() -> String {
        format!("[\"{}\"]", "x".repeat(MAX_BUFFERED_BODY + 1))
    }

    #[tokio::test]
    async fn test_oversized_body_is_streamed_back_intact() {
        let payload = oversized_json();
        let captured = CapturedResponse::collect(
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], payload.clone()).into_response(),
        )
        .await;
        assert!(matches!(captured, CapturedResponse::Streamed(_)));
        assert!(captured.plain_data().unwrap().is_none());

        let response = captured.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_oversized_body_without_length_is_replayed() {
        let payload = oversized_json();
        let chunks: Vec<Result<Bytes, axum::Error>> = payload
            .as_bytes()
            .chunks(64 * 1024)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();

        let captured = CapturedResponse::collect(response).await;
        assert!(matches!(captured, CapturedResponse::Streamed(_)));

        let body = axum::body::to_bytes(captured.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len(), payload.len());
        assert_eq!(body, payload.as_bytes());
    }
}
