//! HTTP API server.
//!
//! Exposes the vault over a small JSON API:
//! - `/api/user/*` — registration and login, open to anyone
//! - `/api/store/{collection}` — record CRUD, bearer-token protected
//! - `/api/sync/*` — device registration for change fan-out
//!
//! Every successful mutation spawns a fire-and-forget signal to the
//! owner's registered devices so they re-pull. The caller never waits on
//! that fan-out.
//!
//! ## Identity
//! The username always comes from the session token, never from the
//! request body, so a client cannot read or touch another user's rows.

pub mod auth;
pub mod registry;
pub mod storage;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::model::{
    AuthRequest, CollectionKind, DeleteRequest, DeviceRequest, StoreRequest, UpdateRequest,
};
use auth::AuthStore;
use registry::DeviceRegistry;
use storage::RecordStore;

/// Largest accepted request body (64 KiB).
const MAX_BODY_SIZE: usize = 65_536;

/// Per-request timeout (seconds).
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Concrete return type for handlers (avoids `impl IntoResponse` inference issues).
type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthStore>,
    pub records: Arc<RecordStore>,
    pub registry: Arc<DeviceRegistry>,
}

/// Build the full API router over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(handle_ping))
        .route("/api/user/register", put(handle_user_register))
        .route("/api/user/login", put(handle_user_login))
        .route(
            "/api/store/{collection}",
            put(handle_store)
                .post(handle_update)
                .get(handle_get_all)
                .delete(handle_delete),
        )
        .route("/api/sync/register", post(handle_device_register))
        .route("/api/sync/unregister", post(handle_device_unregister))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Open the stores and serve the API until ctrl-c.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }
    }

    let state = AppState {
        auth: Arc::new(AuthStore::new(&db_path, config.server.session_ttl_secs)?),
        records: Arc::new(RecordStore::new(&db_path, &config.server.storage_key)?),
        registry: Arc::new(DeviceRegistry::new()),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        db = %db_path.display(),
        "Vault server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

// ── Handler plumbing ────────────────────────────────────────────────

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the calling user from the bearer token, or produce the 401
/// the handler should return.
fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, ApiResponse> {
    let token = extract_bearer_token(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Missing Authorization header"})),
        )
    })?;

    let session = state.auth.validate_session(token).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid or expired session token"})),
        )
    })?;

    Ok(session.username)
}

/// Parse the `{collection}` path segment, or produce the 400 response.
fn parse_collection(raw: &str) -> Result<CollectionKind, ApiResponse> {
    CollectionKind::from_str(raw).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
    })
}

/// Nudge the user's devices without blocking the response.
fn spawn_signal(state: &AppState, username: &str) {
    let registry = state.registry.clone();
    let username = username.to_string();
    tokio::spawn(async move {
        registry.signal(&username).await;
    });
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/ping — liveness probe.
async fn handle_ping() -> &'static str {
    "pong"
}

/// PUT /api/user/register — create an account and log straight in.
async fn handle_user_register(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    if let Err(e) = state.auth.register(&body.username, &body.password) {
        let msg = e.to_string();
        let status = if msg.contains("already taken") {
            StatusCode::CONFLICT
        } else {
            StatusCode::BAD_REQUEST
        };
        return (status, Json(serde_json::json!({"error": msg})));
    }

    match state.auth.create_session(body.username.trim()) {
        Ok(token) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "status": "registered",
                "username": body.username.trim(),
                "token": token,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("Session creation failed: {e}")})),
        ),
    }
}

/// PUT /api/user/login — authenticate and get a session token.
async fn handle_user_login(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    let username = match state.auth.authenticate(&body.username, &body.password) {
        Ok(u) => u,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid username or password"})),
            );
        }
    };

    match state.auth.create_session(&username) {
        Ok(token) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "authenticated",
                "username": username,
                "token": token,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("Session creation failed: {e}")})),
        ),
    }
}

/// PUT /api/store/{collection} — store a new record.
async fn handle_store(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    body: Result<Json<StoreRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let kind = match parse_collection(&collection) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    match state.records.put(&username, kind, &body.data, &body.metadata) {
        Ok(id) => {
            spawn_signal(&state, &username);
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "stored",
                    "collection": kind.as_str(),
                    "id": id,
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// POST /api/store/{collection} — update an existing record.
async fn handle_update(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    body: Result<Json<UpdateRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let kind = match parse_collection(&collection) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    match state
        .records
        .update(&username, kind, &body.record_id, &body.data, &body.metadata)
    {
        Ok(()) => {
            spawn_signal(&state, &username);
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "updated",
                    "collection": kind.as_str(),
                    "id": body.record_id,
                })),
            )
        }
        Err(e) => {
            let msg = e.to_string();
            let status = if msg.contains("not found") {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(serde_json::json!({"error": msg})))
        }
    }
}

/// GET /api/store/{collection} — all of the caller's records, decrypted.
async fn handle_get_all(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let kind = match parse_collection(&collection) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    match state.records.get_all(&username, kind) {
        Ok(records) => match serde_json::to_value(&records) {
            Ok(value) => (StatusCode::OK, Json(value)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            ),
        },
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// DELETE /api/store/{collection} — delete one record by id.
async fn handle_delete(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    body: Result<Json<DeleteRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let kind = match parse_collection(&collection) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    match state.records.delete(&username, kind, &body.record_id) {
        Ok(()) => {
            spawn_signal(&state, &username);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "deleted",
                    "collection": kind.as_str(),
                    "id": body.record_id,
                })),
            )
        }
        Err(e) => {
            let msg = e.to_string();
            let status = if msg.contains("not found") {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(serde_json::json!({"error": msg})))
        }
    }
}

/// POST /api/sync/register — record a device address for the caller.
async fn handle_device_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<DeviceRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    state.registry.register(&username, &body.socket_addr);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "registered",
            "socket_addr": body.socket_addr,
        })),
    )
}

/// POST /api/sync/unregister — drop a device address for the caller.
async fn handle_device_unregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<DeviceRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let username = match require_user(&state, &headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid request: {e}")})),
            );
        }
    };

    state.registry.unregister(&username, &body.socket_addr);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "unregistered",
            "socket_addr": body.socket_addr,
        })),
    )
}

// ── Tests ───────────────────────────────────────────────────────────
