//! Connection registry actor.
//!
//! One task owns the mapping user → live connection and applies register,
//! unregister and dispatch events strictly in arrival order. Every outbound
//! queue is written only from here, with `try_send`, so one slow consumer
//! can never hold up the actor or any other recipient. The map itself sits
//! behind an `RwLock` only so diagnostics can take snapshots without a round
//! trip through the actor.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dm::message::Message;
use crate::presence::PresenceWriter;
use crate::ws::{ConnectionHandle, ConnectionKey};

type Registry = Arc<RwLock<HashMap<String, ConnectionHandle>>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("hub has shut down")]
pub struct HubClosed;

/// Events consumed by the hub actor.
#[derive(Debug)]
pub enum HubEvent {
    Register {
        conn: ConnectionHandle,
        done: oneshot::Sender<()>,
    },
    Unregister(ConnectionKey),
    Dispatch(Message),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front door to the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: Registry,
}

impl HubHandle {
    /// Admit a connection. Returns once the registry entry exists, so the
    /// caller can start the pumps knowing their events queue up behind it.
    pub async fn register(&self, conn: ConnectionHandle) -> Result<(), HubClosed> {
        let (done, wait) = oneshot::channel();
        self.send(HubEvent::Register { conn, done }).await?;
        wait.await.map_err(|_| HubClosed)
    }

    pub async fn unregister(&self, key: ConnectionKey) -> Result<(), HubClosed> {
        self.send(HubEvent::Unregister(key)).await
    }

    pub async fn dispatch(&self, message: Message) -> Result<(), HubClosed> {
        self.send(HubEvent::Dispatch(message)).await
    }

    /// Wait until every event queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), HubClosed> {
        let (done, wait) = oneshot::channel();
        self.send(HubEvent::Flush(done)).await?;
        wait.await.map_err(|_| HubClosed)
    }

    /// Close every live connection and stop the actor.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(HubEvent::Shutdown(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        read(&self.registry).contains_key(user_id)
    }

    /// Sorted snapshot of connected user ids.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = read(&self.registry).keys().cloned().collect();
        users.sort();
        users
    }

    pub fn connection_count(&self) -> usize {
        read(&self.registry).len()
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.events.send(event).await.map_err(|_| HubClosed)
    }
}

fn read(registry: &Registry) -> RwLockReadGuard<'_, HashMap<String, ConnectionHandle>> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    registry: Registry,
    presence: PresenceWriter,
}

impl Hub {
    /// Spawn the hub actor. It runs until `shutdown` is called or every
    /// handle is dropped.
    pub fn spawn(presence: PresenceWriter, queue_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let hub = Hub {
            events: rx,
            registry: registry.clone(),
            presence,
        };
        let handle = tokio::spawn(hub.run());
        (
            HubHandle {
                events: tx,
                registry,
            },
            handle,
        )
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register { conn, done } => {
                    self.register(conn);
                    let _ = done.send(());
                }
                HubEvent::Unregister(key) => self.unregister(&key),
                HubEvent::Dispatch(message) => self.dispatch(&message),
                HubEvent::Flush(done) => {
                    let _ = done.send(());
                }
                HubEvent::Shutdown(done) => {
                    self.events.close();
                    self.close_all();
                    let _ = done.send(());
                    return;
                }
            }
        }
        self.close_all();
    }

    fn registry(&self) -> RwLockWriteGuard<'_, HashMap<String, ConnectionHandle>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&mut self, conn: ConnectionHandle) {
        let user_id = conn.key.user_id.clone();
        let connection_id = conn.key.id;
        let displaced = self.registry().insert(user_id.clone(), conn);

        // The previous session's queue closes as its handle drops here; its
        // write pump sends a close frame and the read pump follows.
        if let Some(previous) = displaced {
            tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                displaced = %previous.key.id,
                "Replacing existing session"
            );
        }

        self.presence.online(&user_id);
        tracing::info!(user_id = %user_id, connection_id = %connection_id, "User connected");
    }

    fn unregister(&mut self, key: &ConnectionKey) {
        let removed = {
            let mut registry = self.registry();
            let is_current = registry
                .get(&key.user_id)
                .is_some_and(|current| current.key.id == key.id);
            if is_current {
                registry.remove(&key.user_id)
            } else {
                None
            }
        };

        match removed {
            Some(conn) => {
                drop(conn);
                self.presence.offline(&key.user_id);
                tracing::info!(
                    user_id = %key.user_id,
                    connection_id = %key.id,
                    "User disconnected"
                );
            }
            None => {
                tracing::debug!(
                    user_id = %key.user_id,
                    connection_id = %key.id,
                    "Unregister for a connection no longer registered"
                );
            }
        }
    }

    fn dispatch(&mut self, message: &Message) {
        self.deliver(&message.receiver_id, message);
        if message.sender_id != message.receiver_id {
            self.deliver(&message.sender_id, message);
        }
    }

    /// Non-blocking enqueue. A full or closed queue evicts that connection.
    fn deliver(&mut self, user_id: &str, message: &Message) {
        let evicted = {
            let mut registry = self.registry();
            let Some(conn) = registry.get(user_id) else {
                return;
            };
            match conn.outbound.try_send(message.clone()) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %conn.key.id,
                        message_id = %message.id,
                        "Outbound queue full, evicting connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        connection_id = %conn.key.id,
                        "Outbound queue already closed, removing connection"
                    );
                }
            }
            registry.remove(user_id)
        };

        drop(evicted);
        self.presence.offline(user_id);
    }

    fn close_all(&mut self) {
        let drained: Vec<(String, ConnectionHandle)> = self.registry().drain().collect();
        for (user_id, conn) in drained {
            drop(conn);
            self.presence.offline(&user_id);
        }
        tracing::info!("Hub stopped");
    }
}
