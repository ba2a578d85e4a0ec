use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::auth::jwt::JwtVerifier;
use crate::config::WsConfig;
use crate::db::store::{MessageStore, SqliteStore};
use crate::db::DbPool;
use crate::dm::pipeline::Pipeline;
use crate::presence::PresenceWriter;
use crate::ws::actor::PumpSettings;
use crate::ws::gate::ConnectionGate;
use crate::ws::hub::{Hub, HubHandle};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>, used by the REST queries
    pub db: DbPool,
    /// Message Store collaborator
    pub store: Arc<dyn MessageStore>,
    /// Access-token verifier for the handshake and REST extractor
    pub verifier: Arc<JwtVerifier>,
    /// Connection registry actor
    pub hub: HubHandle,
    /// Inbound validate → persist → dispatch pipeline
    pub pipeline: Pipeline,
    /// Per-IP WebSocket admission
    pub gate: Arc<ConnectionGate>,
    /// WebSocket limits and timings
    pub ws: WsConfig,
}

impl AppState {
    /// Wire the store, hub and pipeline together. The hub task is returned
    /// so the caller can wait for it after shutdown.
    pub fn new(
        db: DbPool,
        jwt_secret: &[u8],
        presence: PresenceWriter,
        ws: WsConfig,
    ) -> (Self, JoinHandle<()>) {
        let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(db.clone()));
        Self::with_store(db, store, jwt_secret, presence, ws)
    }

    pub fn with_store(
        db: DbPool,
        store: Arc<dyn MessageStore>,
        jwt_secret: &[u8],
        presence: PresenceWriter,
        ws: WsConfig,
    ) -> (Self, JoinHandle<()>) {
        let (hub, hub_task) = Hub::spawn(presence.clone(), ws.hub_queue_capacity);
        let pipeline = Pipeline::new(store.clone(), hub.clone(), presence, ws.max_content_len);
        let state = Self {
            db,
            store,
            verifier: Arc::new(JwtVerifier::new(jwt_secret)),
            hub,
            pipeline,
            gate: ConnectionGate::new(ws.max_connections_per_ip),
            ws,
        };
        (state, hub_task)
    }

    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            ping_interval: self.ws.ping_interval(),
            pong_wait: self.ws.pong_wait(),
            write_wait: self.ws.write_wait(),
        }
    }
}
