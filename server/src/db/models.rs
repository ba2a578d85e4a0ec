//! Database row types.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Persisted presence mirror for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceRow {
    pub user_id: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}
