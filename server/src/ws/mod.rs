pub mod actor;
pub mod gate;
pub mod handler;
pub mod hub;

use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dm::message::Message;

/// Unique per accepted WebSocket session; distinguishes two sessions of the
/// same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one session of one user to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionKey {
    pub id: ConnectionId,
    pub user_id: String,
}

/// The hub's side of a connection: the only sender into its outbound queue.
/// Dropping it closes the queue, which is how the hub stops a write pump.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub key: ConnectionKey,
    pub outbound: mpsc::Sender<Message>,
}

/// The pumps' side of a connection.
#[derive(Debug)]
pub struct Connection {
    pub key: ConnectionKey,
    pub outbound: mpsc::Receiver<Message>,
}

impl Connection {
    /// Create a connection with an empty bounded outbound queue, plus the
    /// handle to hand to the hub.
    pub fn new(user_id: &str, capacity: usize) -> (Connection, ConnectionHandle) {
        let key = ConnectionKey {
            id: ConnectionId::new(),
            user_id: user_id.to_string(),
        };
        let (tx, rx) = mpsc::channel(capacity);
        (
            Connection {
                key: key.clone(),
                outbound: rx,
            },
            ConnectionHandle { key, outbound: tx },
        )
    }
}
