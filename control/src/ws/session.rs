use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use armada_common::response;

use crate::auth::resolve_context;
use crate::authz::{self, AccessLevel, AuthContext};
use crate::server::AppState;

use super::hub::{CLOSE_TRY_AGAIN_LATER, WsFrame};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Subscription messages clients send over the socket.
#[derive(Debug, Deserialize)]
struct ClientAction {
    action: String,
    cluster_id: Option<i64>,
    namespace: Option<String>,
    resource_type: Option<String>,
}

/// WebSocket entry point; the bearer token rides in the handshake (query
/// param or Authorization header).
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string())
    });
    let Some(token) = token else {
        return response::unauthorized(anyhow::anyhow!("missing bearer token"));
    };
    let ctx = match resolve_context(&state, &token).await {
        Ok(ctx) => ctx,
        Err(e) => return response::unauthorized(e),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, ctx: AuthContext) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<String>(64);
    if state.hub.register(&connection_id, ctx.user_id, tx).is_err() {
        // Full house: accept then immediately close with 1013.
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "Try again later".into(),
            })))
            .await;
        return;
    }

    let writer = tokio::spawn(writer_main(sender, rx));

    state
        .hub
        .send_personal(&connection_id, &WsFrame::status_connected())
        .await;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "websocket error");
                break;
            }
        };
        // Any inbound frame proves the client is alive.
        state.hub.mark_heartbeat(&connection_id);
        match msg {
            Message::Text(text) => {
                handle_client_message(&state, &connection_id, &ctx, text.as_str()).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.hub.disconnect(&connection_id);
    // The hub dropped our sender; the writer drains and closes the socket.
    let _ = writer.await;
}

/// Drain the outbound channel into the socket. Per-connection ordering is
/// exactly the channel order.
async fn writer_main(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(payload) = rx.recv().await {
        if sender.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

async fn handle_client_message(
    state: &AppState,
    connection_id: &str,
    ctx: &AuthContext,
    raw: &str,
) {
    let action: ClientAction = match serde_json::from_str(raw) {
        Ok(action) => action,
        Err(e) => {
            state
                .hub
                .send_personal(connection_id, &WsFrame::error(&format!("bad message: {}", e)))
                .await;
            return;
        }
    };

    if action.action == "pong" {
        state.hub.mark_heartbeat(connection_id);
        return;
    }

    let Some(cluster_id) = action.cluster_id else {
        state
            .hub
            .send_personal(connection_id, &WsFrame::error("cluster_id is required"))
            .await;
        return;
    };

    // Joining a room is a read on that cluster.
    if action.action.starts_with("join")
        && let Err(denial) = authz::authorize(ctx, AccessLevel::Read, Some(cluster_id), None)
    {
        state
            .hub
            .send_personal(connection_id, &WsFrame::error(&denial.0))
            .await;
        return;
    }

    match action.action.as_str() {
        "join_cluster" => state.hub.join_cluster(connection_id, cluster_id),
        "leave_cluster" => state.hub.leave_cluster(connection_id, cluster_id),
        "join_namespace" | "leave_namespace" => {
            let Some(ns) = action.namespace.as_deref() else {
                state
                    .hub
                    .send_personal(connection_id, &WsFrame::error("namespace is required"))
                    .await;
                return;
            };
            if action.action == "join_namespace" {
                state.hub.join_namespace(connection_id, cluster_id, ns);
            } else {
                state.hub.leave_namespace(connection_id, cluster_id, ns);
            }
        }
        "join_kind" | "leave_kind" => {
            let Some(kind) = action.resource_type.as_deref() else {
                state
                    .hub
                    .send_personal(connection_id, &WsFrame::error("resource_type is required"))
                    .await;
                return;
            };
            if action.action == "join_kind" {
                state.hub.join_kind(connection_id, cluster_id, kind);
            } else {
                state.hub.leave_kind(connection_id, cluster_id, kind);
            }
        }
        other => {
            state
                .hub
                .send_personal(
                    connection_id,
                    &WsFrame::error(&format!("unknown action: {}", other)),
                )
                .await;
        }
    }
}
