use axum::{middleware, routing::get, routing::put, Router};

use crate::auth::middleware::AuthVerifier;
use crate::dm::{conversations, history};
use crate::presence;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the token verifier into request extensions so the Claims extractor can find it.
async fn inject_verifier(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(AuthVerifier(state.verifier.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (Claims extractor validates cookie or bearer token)
    let message_routes = Router::new()
        .route("/api/messages", get(history::get_messages))
        .route("/api/messages/unread", get(history::get_unread_count))
        .route("/api/messages/{user_id}/read", put(history::mark_messages_read))
        .route("/api/conversations", get(conversations::list_conversations));

    let presence_routes = Router::new()
        .route("/api/presence/{user_id}", get(presence::get_presence))
        .route("/api/online", get(presence::list_online));

    // WebSocket endpoint (auth via query param, not cookie or header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(presence_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_verifier,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
