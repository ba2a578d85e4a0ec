//! REST endpoint listing the caller's conversations.
//!
//! A conversation is every message exchanged with one partner. The list is
//! derived from the messages table on each request; there is no separate
//! conversation record.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::db::store::parse_timestamp;
use crate::state::AppState;

#[derive(Debug, Serialize, Clone)]
pub struct Partner {
    pub id: String,
    /// Live registry view
    pub online: bool,
    /// Persisted presence, absent if the partner was never seen
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Clone)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ConversationSummary {
    pub user: Partner,
    pub last_message: LastMessage,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
}

/// GET /api/conversations
/// One entry per partner, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ConversationsResponse>, StatusCode> {
    let db = state.db.clone();
    let mut conversations = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        summarize(&conn, &claims.user_id).map_err(|e| {
            tracing::error!(error = %e, "Failed to list conversations");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    for conv in &mut conversations {
        conv.user.online = state.hub.is_online(&conv.user.id);
    }

    Ok(Json(ConversationsResponse { conversations }))
}

/// Latest message and unread count per partner. `online` is left false for
/// the caller to fill from the registry.
pub fn summarize(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "WITH mine AS (
             SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner_id,
                    id, sender_id, receiver_id, content, read, created_at
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
         ),
         ranked AS (
             SELECT *,
                    ROW_NUMBER() OVER (PARTITION BY partner_id ORDER BY created_at DESC, id DESC) AS rn,
                    SUM(CASE WHEN receiver_id = ?1 AND read = 0 THEN 1 ELSE 0 END)
                        OVER (PARTITION BY partner_id) AS unread_count
             FROM mine
         )
         SELECT r.partner_id, r.content, r.created_at, r.sender_id, r.unread_count, p.last_seen
         FROM ranked r
         LEFT JOIN presence p ON p.user_id = r.partner_id
         WHERE r.rn = 1
         ORDER BY r.created_at DESC",
    )?;

    let conversations = stmt
        .query_map(rusqlite::params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .filter_map(|r| r.ok())
        .filter_map(|(partner_id, content, created_at, sender_id, unread_count, last_seen)| {
            Some(ConversationSummary {
                user: Partner {
                    id: partner_id,
                    online: false,
                    last_seen: last_seen.and_then(|raw| parse_timestamp(&raw).ok()),
                },
                last_message: LastMessage {
                    content,
                    created_at: parse_timestamp(&created_at).ok()?,
                    sender_id,
                },
                unread_count,
            })
        })
        .collect();

    Ok(conversations)
}
