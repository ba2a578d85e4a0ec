//! Best-effort presence mirror.
//!
//! The hub and the message pipeline never touch the store for presence
//! directly. They push updates into a bounded queue drained by a single
//! background worker, so a slow store can delay the persisted flag but never
//! stall registry events. Updates are applied in the order they were recorded.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::middleware::Claims;
use crate::db::store::MessageStore;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    Online { user_id: String, at: DateTime<Utc> },
    Offline { user_id: String, at: DateTime<Utc> },
    LastSeen { user_id: String, at: DateTime<Utc> },
}

impl PresenceUpdate {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Online { user_id, .. }
            | Self::Offline { user_id, .. }
            | Self::LastSeen { user_id, .. } => user_id,
        }
    }
}

/// Producer half of the presence queue. Cheap to clone.
#[derive(Clone)]
pub struct PresenceWriter {
    tx: mpsc::Sender<PresenceUpdate>,
}

impl PresenceWriter {
    /// Create a writer and the queue it feeds, without a worker.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PresenceUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn online(&self, user_id: &str) {
        self.record(PresenceUpdate::Online {
            user_id: user_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn offline(&self, user_id: &str) {
        self.record(PresenceUpdate::Offline {
            user_id: user_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn last_seen(&self, user_id: &str) {
        self.record(PresenceUpdate::LastSeen {
            user_id: user_id.to_string(),
            at: Utc::now(),
        });
    }

    /// Queue an update without waiting. Drops it when the queue is full.
    pub fn record(&self, update: PresenceUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!(
                    user_id = %update.user_id(),
                    "Presence queue full, dropping update"
                );
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                tracing::debug!(
                    user_id = %update.user_id(),
                    "Presence worker stopped, dropping update"
                );
            }
        }
    }
}

/// Spawn the worker that applies queued updates to the store.
/// It exits once every `PresenceWriter` clone has been dropped and the
/// queue is drained.
pub fn spawn_presence_worker(
    store: Arc<dyn MessageStore>,
    capacity: usize,
) -> (PresenceWriter, JoinHandle<()>) {
    let (writer, rx) = PresenceWriter::channel(capacity);
    let handle = tokio::spawn(run_presence_worker(rx, store));
    (writer, handle)
}

pub async fn run_presence_worker(
    mut rx: mpsc::Receiver<PresenceUpdate>,
    store: Arc<dyn MessageStore>,
) {
    while let Some(update) = rx.recv().await {
        let store = store.clone();
        let applied = tokio::task::spawn_blocking(move || {
            let result = match &update {
                PresenceUpdate::Online { user_id, at } => store.set_online(user_id, true, *at),
                PresenceUpdate::Offline { user_id, at } => store.set_online(user_id, false, *at),
                PresenceUpdate::LastSeen { user_id, at } => store.update_last_seen(user_id, *at),
            };
            (update, result)
        })
        .await;

        match applied {
            Ok((_, Ok(()))) => {}
            Ok((update, Err(e))) => {
                tracing::warn!(
                    user_id = %update.user_id(),
                    error = %e,
                    "Failed to persist presence update"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Presence update task failed");
            }
        }
    }

    tracing::debug!("Presence worker stopped");
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: String,
    /// Persisted flag, may lag the registry
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    /// Whether the user holds a live connection right now
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    pub users: Vec<String>,
    pub connections: usize,
}

/// GET /api/presence/{user_id}
/// 404 when the user has never been seen.
pub async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, StatusCode> {
    let store = state.store.clone();
    let lookup = user_id.clone();
    let row = tokio::task::spawn_blocking(move || store.presence(&lookup))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load presence");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(PresenceResponse {
        connected: state.hub.is_online(&row.user_id),
        user_id: row.user_id,
        online: row.online,
        last_seen: row.last_seen,
    }))
}

/// GET /api/online
/// Snapshot of the live registry.
pub async fn list_online(State(state): State<AppState>, _claims: Claims) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        users: state.hub.online_users(),
        connections: state.hub.connection_count(),
    })
}
