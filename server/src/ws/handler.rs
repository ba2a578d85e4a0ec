use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::auth::jwt::TokenVerifier;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// Over the per-IP cap: 429 without upgrading. Missing or invalid token:
/// upgrade, then drop the socket without sending anything.
/// On success, runs the connection's pumps.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(permit) = state.gate.try_acquire(addr.ip()) else {
        tracing::warn!(ip = %addr.ip(), "Too many WebSocket connections from address");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many WebSocket connections from this IP",
        )
            .into_response();
    };

    let token = params.token.unwrap_or_default();
    match state.verifier.verify(&token) {
        Ok(user_id) => {
            tracing::info!(user_id = %user_id, ip = %addr.ip(), "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| async move {
                actor::run_connection(socket, state, user_id).await;
                drop(permit);
            })
        }
        Err(err) => {
            tracing::warn!(ip = %addr.ip(), reason = %err, "WebSocket auth failed");
            ws.on_upgrade(|socket| async move { drop(socket) })
        }
    }
}
