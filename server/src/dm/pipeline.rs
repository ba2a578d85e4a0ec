//! Inbound message pipeline: validate, persist, then dispatch.
//!
//! Each step gates the next. A request that fails any step leaves no trace
//! beyond a log line: nothing is stored, nothing is sent, the sender is not
//! told. A failed insert is not retried.

use std::sync::Arc;
use thiserror::Error;

use crate::db::store::{MessageStore, StoreError};
use crate::dm::message::{Message, SendMessageRequest, ValidationError};
use crate::presence::PresenceWriter;
use crate::ws::hub::{HubClosed, HubHandle};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid message: {}", describe(.0))]
    Invalid(Vec<ValidationError>),

    #[error("receiver is the sender")]
    SelfAddressed,

    #[error("failed to persist message: {0}")]
    Persist(#[from] StoreError),

    #[error(transparent)]
    HubClosed(#[from] HubClosed),
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn MessageStore>,
    hub: HubHandle,
    presence: PresenceWriter,
    max_content_len: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        hub: HubHandle,
        presence: PresenceWriter,
        max_content_len: usize,
    ) -> Self {
        Self {
            store,
            hub,
            presence,
            max_content_len,
        }
    }

    /// Turn a request from `sender_id` into a stored, dispatched message.
    pub async fn process(
        &self,
        sender_id: &str,
        request: SendMessageRequest,
    ) -> Result<Message, PipelineError> {
        let valid = request
            .validate(self.max_content_len)
            .map_err(PipelineError::Invalid)?;

        if valid.receiver_id == sender_id {
            return Err(PipelineError::SelfAddressed);
        }

        // Id and timestamp come from the server, never the client.
        let message = Message::new(sender_id, &valid.receiver_id, valid.content, valid.kind);

        let store = self.store.clone();
        let message = tokio::task::spawn_blocking(move || store.insert(&message).map(|()| message))
            .await
            .map_err(StoreError::from)??;

        self.presence.last_seen(sender_id);
        self.hub.dispatch(message.clone()).await?;

        Ok(message)
    }
}
