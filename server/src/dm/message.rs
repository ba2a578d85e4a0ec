//! Direct message model and inbound request validation.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allowed message kinds. Stored and sent as lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted direct message, as sent to both participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh unread message stamped with the server clock, at the
    /// microsecond precision the store keeps.
    pub fn new(sender_id: &str, receiver_id: &str, content: String, kind: MessageKind) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content,
            kind,
            read: false,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Client → server frame. Every field defaults so a missing field is a
/// validation failure rather than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingReceiver,
    EmptyContent,
    ContentTooLong { len: usize, max: usize },
    UnknownKind(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReceiver => f.write_str("receiver_id is required"),
            Self::EmptyContent => f.write_str("content is required"),
            Self::ContentTooLong { len, max } => {
                write!(f, "content is {} characters, max {}", len, max)
            }
            Self::UnknownKind(kind) => write!(f, "unknown message type {:?}", kind),
        }
    }
}

/// A request that passed every structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub receiver_id: String,
    pub content: String,
    pub kind: MessageKind,
}

impl SendMessageRequest {
    /// Check every field and collect all failures.
    pub fn validate(self, max_content_len: usize) -> Result<ValidRequest, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let receiver_id = self.receiver_id.trim().to_string();
        if receiver_id.is_empty() {
            errors.push(ValidationError::MissingReceiver);
        }

        let len = self.content.chars().count();
        if self.content.trim().is_empty() {
            errors.push(ValidationError::EmptyContent);
        } else if len > max_content_len {
            errors.push(ValidationError::ContentTooLong {
                len,
                max: max_content_len,
            });
        }

        let kind = match self.kind.parse::<MessageKind>() {
            Ok(kind) => Some(kind),
            Err(()) => {
                errors.push(ValidationError::UnknownKind(self.kind.clone()));
                None
            }
        };

        match kind {
            Some(kind) if errors.is_empty() => Ok(ValidRequest {
                receiver_id,
                content: self.content,
                kind,
            }),
            _ => Err(errors),
        }
    }
}
