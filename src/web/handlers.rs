//! HTTP request handlers.

use super::AppState;
use crate::config::AuthConfig;
use crate::db::{NewService, Service, StoreError};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, Request, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

// ============================================================================
// Health check
// ============================================================================

pub async fn handle_ping() -> impl IntoResponse {
    Json(json!({"message": "pong"}))
}

// ============================================================================
// Basic auth
// ============================================================================

/// Middleware guarding the registration endpoints.
pub async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if authorized(request.headers(), &state.auth) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response()
    }
}

fn authorized(headers: &HeaderMap, auth: &AuthConfig) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    match credentials.split_once(':') {
        Some((user, pass)) => user == auth.username && pass == auth.password,
        None => false,
    }
}

// ============================================================================
// Services
// ============================================================================

pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<NewService>,
) -> impl IntoResponse {
    match state.store.register(&req) {
        Ok(service) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "service registered successfully",
                "service": service,
            })),
        )
            .into_response(),
        Err(StoreError::Validation(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

pub async fn handle_list(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_services() {
        Ok(services) => {
            let by_id: HashMap<i64, Service> = services.into_iter().map(|s| (s.id, s)).collect();
            Json(json!({"services": by_id})).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ============================================================================
// Probe logs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub async fn handle_logs(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    match state.store.list_logs(service_id, query.limit, query.offset) {
        Ok(logs) => Json(json!({"logs": logs})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ============================================================================
// WebSocket
// ============================================================================

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut events) = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // Writer: drain the hub buffer to the socket. Ends when the hub closes
    // the buffer (eviction) or the socket write fails.
    let writer = tokio::spawn(async move {
        while let Some(payload) = events.recv().await {
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: watch for the remote end going away.
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unsubscribe(id);
    writer.abort();
    tracing::debug!("WS: subscriber {} disconnected", id);
}
