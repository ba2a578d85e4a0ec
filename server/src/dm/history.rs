//! REST endpoints for message history and read state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::store::parse_timestamp;
use crate::dm::message::{Message, MessageKind};
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message: String,
    pub messages_updated: usize,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread_count: i64,
}

/// GET /api/messages?user_id={id}&page={n}&limit={n}
/// Conversation between the caller and `user_id`, one page at a time.
/// Pages count back from the newest message; each page is chronological.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let other_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let db = state.db.clone();
    let user_id = claims.user_id.clone();
    let other = other_id.clone();
    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        fetch_page(&conn, &user_id, &other, page, limit).map_err(|e| {
            tracing::error!(error = %e, "Failed to fetch message history");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // Reading the conversation acknowledges what the other side sent
    let db = state.db.clone();
    let user_id = claims.user_id;
    tokio::task::spawn_blocking(move || {
        let Ok(conn) = db.lock() else {
            return;
        };
        if let Err(e) = mark_read(&conn, &other_id, &user_id) {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to mark messages read");
        }
    });

    Ok(Json(HistoryResponse {
        messages,
        pagination: Pagination { page, limit },
    }))
}

/// PUT /api/messages/{user_id}/read
/// Mark everything `user_id` sent to the caller as read.
pub async fn mark_messages_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<String>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    if other_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let updated = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        mark_read(&conn, &other_id, &claims.user_id).map_err(|e| {
            tracing::error!(error = %e, "Failed to mark messages read");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(MarkReadResponse {
        message: "Messages marked as read".to_string(),
        messages_updated: updated,
    }))
}

/// GET /api/messages/unread
pub async fn get_unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadResponse>, StatusCode> {
    let db = state.db.clone();
    let unread_count = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
            rusqlite::params![claims.user_id],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(UnreadResponse { unread_count }))
}

/// Page `page` (1-based, newest first) of the conversation between two
/// users, returned oldest first.
pub fn fetch_page(
    conn: &Connection,
    user_id: &str,
    other_id: &str,
    page: u32,
    limit: u32,
) -> rusqlite::Result<Vec<Message>> {
    let offset = (page.saturating_sub(1) as i64) * limit as i64;
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, content, type, read, created_at
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at DESC, id DESC
         LIMIT ?3 OFFSET ?4",
    )?;

    let mut messages: Vec<Message> = stmt
        .query_map(
            rusqlite::params![user_id, other_id, limit as i64, offset],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )?
        .filter_map(|r| r.ok())
        .filter_map(|(id, sender_id, receiver_id, content, kind, read, created_at)| {
            let kind = kind.parse::<MessageKind>().ok()?;
            let created_at = parse_timestamp(&created_at).ok()?;
            Some(Message {
                id,
                sender_id,
                receiver_id,
                content,
                kind,
                read,
                created_at,
            })
        })
        .collect();

    messages.reverse();
    Ok(messages)
}

/// Mark unread messages from `sender_id` to `receiver_id` read.
/// Returns the number of rows changed.
pub fn mark_read(conn: &Connection, sender_id: &str, receiver_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE messages SET read = 1 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
        rusqlite::params![sender_id, receiver_id],
    )
}
