//! Countdown HTTP REST API
//!
//! Axum server that maps `/api/groups/{groupId}/...` onto the coordinator of
//! that group. Runs alongside the Unix socket IPC server.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions go through the same router as IPC
//! requests and are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /version
//! - POST   /api/groups                                   create + bootstrap a group
//! - GET    /api/groups/:group_id                         full group state
//! - POST   /api/groups/:group_id/bootstrap
//! - GET    /api/groups/:group_id/sessions
//! - POST   /api/groups/:group_id/sessions
//! - GET    /api/groups/:group_id/sessions/:session_id
//! - PATCH  /api/groups/:group_id/sessions/:session_id
//! - DELETE /api/groups/:group_id/sessions/:session_id
//!
//! Bodies are read as raw bytes and parsed here, whatever the content type, so
//! that every failure is answered with the JSON error envelope.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use countdown_core::ipc::{CountdownRequest, CountdownResponse};
use countdown_core::models::utc_millis;
use countdown_core::CountdownConfig;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::subsystems::registry::CoordinatorRegistry;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<CoordinatorRegistry>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let api = Router::new()
        .route("/groups", post(create_group_handler))
        .route("/groups/:group_id", get(get_group_handler))
        .route("/groups/:group_id/bootstrap", post(bootstrap_handler))
        .route(
            "/groups/:group_id/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route(
            "/groups/:group_id/sessions/:session_id",
            get(get_session_handler)
                .patch(update_session_handler)
                .delete(delete_session_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    registry: Arc<CoordinatorRegistry>,
    config: CountdownConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { registry });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Countdown HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub group_id: Option<String>,
    pub label: Option<String>,
    pub timezone: Option<String>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn health_inner() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "timestamp": utc_millis::format(&chrono::Utc::now()),
    })
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "countdown/1",
    })
}

/// Run a request through the router and turn the envelope into an HTTP reply.
pub async fn dispatch_inner(
    registry: &CoordinatorRegistry,
    request: CountdownRequest,
) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(request, registry).await;
    response_to_http(response)
}

/// `POST /api/groups`: picks an id when none is given, then bootstraps.
pub async fn create_group_inner(
    registry: &CoordinatorRegistry,
    req: CreateGroupRequest,
) -> (StatusCode, serde_json::Value) {
    if req.label.as_deref().map_or(true, str::is_empty) {
        return (
            StatusCode::BAD_REQUEST,
            error_body("label is required", "validation"),
        );
    }

    let group_id = req
        .group_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let payload = serde_json::json!({
        "groupId": group_id,
        "label": req.label,
        "timezone": req.timezone.unwrap_or_else(|| "UTC".to_string()),
    });
    dispatch_inner(registry, CountdownRequest::Bootstrap { group_id, payload }).await
}

/// Parse a request body as JSON. An empty body is `null`, so payload decoding
/// reports the missing fields instead of a parse error.
pub fn parse_body(body: &[u8]) -> std::result::Result<serde_json::Value, (StatusCode, serde_json::Value)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            error_body(&format!("Invalid JSON body: {}", e), "validation"),
        )
    })
}

pub fn parse_create_group(
    body: &[u8],
) -> std::result::Result<CreateGroupRequest, (StatusCode, serde_json::Value)> {
    let value = parse_body(body)?;
    if value.is_null() {
        return Ok(CreateGroupRequest::default());
    }
    serde_json::from_value(value).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            error_body(&format!("Invalid payload: {}", e), "validation"),
        )
    })
}

/// Session ids that are not UUIDs cannot name any session.
pub fn parse_session_id(raw: &str) -> std::result::Result<Uuid, (StatusCode, serde_json::Value)> {
    Uuid::parse_str(raw).map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            error_body("Session not found", "not_found"),
        )
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(health_inner()))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn create_group_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match parse_create_group(&body) {
        Ok(req) => create_group_inner(&state.registry, req).await,
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

pub async fn get_group_handler(
    State(state): State<Arc<HttpState>>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) =
        dispatch_inner(&state.registry, CountdownRequest::GetGroup { group_id }).await;
    (status, Json(body))
}

pub async fn bootstrap_handler(
    State(state): State<Arc<HttpState>>,
    Path(group_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match parse_body(&body) {
        Ok(payload) => {
            dispatch_inner(
                &state.registry,
                CountdownRequest::Bootstrap { group_id, payload },
            )
            .await
        }
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) =
        dispatch_inner(&state.registry, CountdownRequest::ListSessions { group_id }).await;
    (status, Json(body))
}

pub async fn create_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(group_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match parse_body(&body) {
        Ok(payload) => {
            dispatch_inner(
                &state.registry,
                CountdownRequest::CreateSession { group_id, payload },
            )
            .await
        }
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path((group_id, session_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let (status, body) = match parse_session_id(&session_id) {
        Ok(session_id) => {
            dispatch_inner(
                &state.registry,
                CountdownRequest::GetSession {
                    group_id,
                    session_id,
                },
            )
            .await
        }
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

pub async fn update_session_handler(
    State(state): State<Arc<HttpState>>,
    Path((group_id, session_id)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let parsed = parse_session_id(&session_id)
        .and_then(|session_id| parse_body(&body).map(|payload| (session_id, payload)));
    let (status, body) = match parsed {
        Ok((session_id, payload)) => {
            dispatch_inner(
                &state.registry,
                CountdownRequest::UpdateSession {
                    group_id,
                    session_id,
                    payload,
                },
            )
            .await
        }
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

pub async fn delete_session_handler(
    State(state): State<Arc<HttpState>>,
    Path((group_id, session_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let (status, body) = match parse_session_id(&session_id) {
        Ok(session_id) => {
            dispatch_inner(
                &state.registry,
                CountdownRequest::DeleteSession {
                    group_id,
                    session_id,
                },
            )
            .await
        }
        Err(rejection) => rejection,
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn error_body(msg: &str, code: &str) -> serde_json::Value {
    serde_json::json!({
        "error": msg,
        "status": "error",
        "code": code,
    })
}

/// Map an error code from the envelope to an HTTP status.
pub fn status_for_code(code: Option<&str>) -> StatusCode {
    match code {
        Some("validation") => StatusCode::BAD_REQUEST,
        Some("not_found") => StatusCode::NOT_FOUND,
        Some("unavailable") => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a `CountdownResponse` into an HTTP status and body.
pub fn response_to_http(response: CountdownResponse) -> (StatusCode, serde_json::Value) {
    if response.is_ok() {
        let status = if response.created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        (status, response.data.unwrap_or(serde_json::json!({})))
    } else {
        let code = response.code.as_deref();
        (
            status_for_code(code),
            error_body(
                response.error.as_deref().unwrap_or("unknown error"),
                code.unwrap_or("internal"),
            ),
        )
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use countdown_core::{MemorySink, MemoryStore};

    fn registry() -> CoordinatorRegistry {
        CoordinatorRegistry::new(Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()), 8)
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "countdown/1");
    }

    #[test]
    fn test_health_inner_has_timestamp() {
        let v = health_inner();
        assert_eq!(v["status"], "ok");
        assert!(v["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_response_to_http_created() {
        let (status, body) =
            response_to_http(CountdownResponse::created(serde_json::json!({"id": 1})));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], 1);
    }

    #[test]
    fn test_response_to_http_error_codes() {
        let cases = [
            ("validation", StatusCode::BAD_REQUEST),
            ("not_found", StatusCode::NOT_FOUND),
            ("persistence", StatusCode::INTERNAL_SERVER_ERROR),
            ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (code, expected) in cases {
            let (status, body) = response_to_http(CountdownResponse::err(code, "boom"));
            assert_eq!(status, expected, "code {}", code);
            assert_eq!(body["error"], "boom");
            assert_eq!(body["code"], code);
        }
    }

    #[test]
    fn test_response_to_http_ok_no_data() {
        let mut resp = CountdownResponse::ok(serde_json::json!({}));
        resp.data = None;
        let (status, body) = response_to_http(resp);
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_object());
    }

    #[test]
    fn test_parse_session_id_rejects_garbage() {
        let (status, body) = parse_session_id("not-a-uuid").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
    }

    #[test]
    fn test_parse_body_empty_is_null() {
        assert!(parse_body(b"").unwrap().is_null());
        assert!(parse_body(b"  \n").unwrap().is_null());
    }

    #[test]
    fn test_parse_body_rejects_malformed_json() {
        let (status, body) = parse_body(b"{not json").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "validation");
    }

    #[test]
    fn test_parse_create_group_wrong_type() {
        let (status, body) = parse_create_group(br#"{"label": 7}"#).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
        assert!(parse_create_group(b"").unwrap().label.is_none());
    }

    #[tokio::test]
    async fn test_create_group_requires_label() {
        let (status, body) = create_group_inner(&registry(), CreateGroupRequest::default()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "label is required");
    }

    #[tokio::test]
    async fn test_create_group_mints_id() {
        let registry = registry();
        let (status, body) = create_group_inner(
            &registry,
            CreateGroupRequest {
                group_id: None,
                label: Some("Season".to_string()),
                timezone: None,
            },
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["label"], "Season");
        assert_eq!(body["timezone"], "UTC");
        assert_eq!(body["version"], 1);
        let group_id = body["groupId"].as_str().unwrap();
        assert!(Uuid::parse_str(group_id).is_ok());
    }

    #[tokio::test]
    async fn test_create_group_with_explicit_id() {
        let registry = registry();
        let (status, body) = create_group_inner(
            &registry,
            CreateGroupRequest {
                group_id: Some("  world-cup ".to_string()),
                label: Some("World Cup".to_string()),
                timezone: Some("America/New_York".to_string()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["groupId"], "world-cup");
        assert_eq!(body["timezone"], "America/New_York");
    }
}
