use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use crate::dm::message::{Message, SendMessageRequest};
use crate::dm::pipeline::PipelineError;
use crate::state::AppState;
use crate::ws::{Connection, ConnectionKey};

/// Timing for one connection's pumps.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Interval between server pings
    pub ping_interval: Duration,
    /// Read deadline, pushed forward by every pong
    pub pong_wait: Duration,
    /// Deadline for each socket write
    pub write_wait: Duration,
}

/// Run one authenticated WebSocket session to completion.
///
/// Registers a fresh connection with the hub, then runs two pumps:
/// - Write pump (spawned): sole writer to the socket, drains the outbound
///   queue and sends keepalive pings
/// - Read pump (inline): sole reader, feeds frames into the message pipeline
///
/// When either pump stops the connection is unregistered exactly once. The
/// hub then closes the outbound queue, which ends the write pump.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let settings = state.pump_settings();
    let (conn, handle) = Connection::new(&user_id, state.ws.outbound_capacity);
    let Connection { key, outbound } = conn;

    if state.hub.register(handle).await.is_err() {
        tracing::warn!(user_id = %user_id, "Hub unavailable, dropping connection");
        return;
    }

    tracing::info!(
        user_id = %key.user_id,
        connection_id = %key.id,
        "WebSocket session started"
    );

    let (ws_sender, ws_receiver) = socket.split();
    let mut writer = tokio::spawn(write_pump(ws_sender, outbound, key.clone(), settings));

    // A finished write pump means the hub dropped this connection or the
    // socket failed, so there is nothing left to read for.
    let writer_done = tokio::select! {
        _ = read_pump(ws_receiver, &state, &key, settings.pong_wait) => false,
        _ = &mut writer => true,
    };

    if state.hub.unregister(key.clone()).await.is_err() {
        tracing::debug!(user_id = %key.user_id, "Hub already stopped during unregister");
    }

    // The write pump exits once it has flushed its queue and sent a close
    // frame. Each write is bounded but a long backlog on a dead socket is not.
    if !writer_done && timeout(settings.write_wait * 2, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(
        user_id = %key.user_id,
        connection_id = %key.id,
        "WebSocket session stopped"
    );
}

/// Drain the outbound queue onto the socket and emit pings.
async fn write_pump(
    mut ws_sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Message>,
    key: ConnectionKey,
    settings: PumpSettings,
) {
    let mut ping_timer = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    // Queue closed by the hub: say goodbye and stop
                    let _ = write_frame(&mut ws_sender, WsMessage::Close(None), settings.write_wait).await;
                    break;
                };

                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(message_id = %message.id, error = %e, "Failed to encode message");
                        continue;
                    }
                };

                if let Err(e) = write_frame(&mut ws_sender, WsMessage::Text(json.into()), settings.write_wait).await {
                    tracing::debug!(user_id = %key.user_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = ping_timer.tick() => {
                if let Err(e) = write_frame(&mut ws_sender, WsMessage::Ping(Default::default()), settings.write_wait).await {
                    tracing::debug!(user_id = %key.user_id, error = %e, "WebSocket ping failed");
                    break;
                }
            }
        }
    }

    let _ = timeout(settings.write_wait, ws_sender.close()).await;
    tracing::debug!(
        user_id = %key.user_id,
        connection_id = %key.id,
        "Write pump stopped"
    );
}

async fn write_frame(
    ws_sender: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    deadline: Duration,
) -> Result<(), String> {
    match timeout(deadline, ws_sender.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}

/// Read frames until the peer goes away, misses the read deadline or sends
/// something that does not decode as a send request.
async fn read_pump(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &AppState,
    key: &ConnectionKey,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = match timeout_at(deadline, ws_receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                tracing::warn!(user_id = %key.user_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(None) => {
                tracing::info!(user_id = %key.user_id, "WebSocket stream ended");
                break;
            }
            Err(_) => {
                tracing::info!(user_id = %key.user_id, "No pong before read deadline");
                break;
            }
        };

        let decoded = match frame {
            WsMessage::Text(text) => serde_json::from_str::<SendMessageRequest>(text.as_str()),
            WsMessage::Binary(data) => serde_json::from_slice::<SendMessageRequest>(&data),
            WsMessage::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                continue;
            }
            // Answered by the protocol layer
            WsMessage::Ping(_) => continue,
            WsMessage::Close(frame) => {
                tracing::info!(user_id = %key.user_id, reason = ?frame, "Client initiated close");
                break;
            }
        };

        let request = match decoded {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(user_id = %key.user_id, error = %e, "Undecodable frame, closing");
                break;
            }
        };

        match state.pipeline.process(&key.user_id, request).await {
            Ok(message) => {
                tracing::debug!(
                    user_id = %key.user_id,
                    message_id = %message.id,
                    receiver_id = %message.receiver_id,
                    "Message accepted"
                );
            }
            Err(PipelineError::HubClosed(_)) => break,
            Err(e @ PipelineError::Persist(_)) => {
                tracing::warn!(user_id = %key.user_id, error = %e, "Dropping message");
            }
            Err(e) => {
                tracing::debug!(user_id = %key.user_id, error = %e, "Dropping message");
            }
        }
    }
}
