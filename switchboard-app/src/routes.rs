//! HTTP and websocket boundary.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe |
//! | `GET` | `/status` | Aggregate running flag and every connector's status |
//! | `GET` | `/connector/{id}/status` | One connector's status |
//! | `POST` | `/connector/{id}/webhook` | Inbound platform webhook |
//! | `GET` | `/ws` | Live feed of processed messages as JSON text frames |
//! | `POST` | `/start`, `/stop` | Start or stop every connector |
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use switchboard_core::{BroadcastHub, WebhookHeaders};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/connector/{id}/status", get(connector_status))
        .route("/connector/{id}/webhook", post(webhook))
        .route("/ws", get(ws_upgrade))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "running": state.is_running().await,
        "connectors": state.runner.status(),
    }))
}

async fn connector_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.runner.get_connector(&id) {
        Some(connector) => Json(connector.status()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found"),
    }
}

/// Malformed bodies and secret mismatches still answer `{"ok": true}`; the
/// connector decides what, if anything, to ingest.
async fn webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Option<Value> = serde_json::from_slice(&body).ok();
    let headers: WebhookHeaders = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();

    match state.runner.route_webhook(&id, payload.as_ref(), &headers) {
        Ok(accepted) => {
            tracing::debug!(connector = %id, accepted, "webhook handled");
            Json(json!({ "ok": true })).into_response()
        }
        Err(rejection) => error_response(StatusCode::NOT_FOUND, rejection.as_str()),
    }
}

async fn start(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "running": state.start().await }))
}

async fn stop(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "running": state.stop().await }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| forward(socket, state.hub))
}

/// Pump hub frames to one client until either side goes away.
async fn forward(socket: WebSocket, hub: BroadcastHub) {
    let (id, mut frames) = hub.subscribe();
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if sink.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                // hub cleared at shutdown
                None => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unsubscribe(&id);
    let _ = sink.close().await;
    tracing::debug!(subscriber = %id, "websocket closed");
}
