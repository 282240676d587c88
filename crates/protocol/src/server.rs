//! Server → Client messages

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::*;

/// A `{type, payload}` frame that parsed as JSON but has not been
/// interpreted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse a text frame. Fails on non-JSON text and on JSON without a
    /// string `type` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A known message kind arrived with a payload that does not fit its shape.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ServerMessage {
    // Assistant activity
    StatusUpdate(StatusUpdate),
    ChatDelta(String),
    SuggestionsUpdate(Vec<String>),
    ChatHistory(ChatHistory),

    // Artifacts
    ArtifactOpen(Artifact),
    ArtifactUpdate(ArtifactContentUpdate),
    ArtifactSyncEvent(ArtifactSync),
    ArtifactVisualSync(ArtifactVisual),

    // Session and project state
    SessionEstablished(SessionEstablished),
    StateUpdate(StateSnapshot),
    ValidationWarn(ValidationWarning),

    /// A kind this client does not know about. Never sent, only decoded.
    #[serde(skip)]
    Unknown { kind: String },
}

/// Older servers send the status as a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusPayload {
    Bare(SystemStatus),
    Full(StatusUpdate),
}

/// History arrives either as `{messages: [...]}` or as the bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    Bare(Vec<ChatMessage>),
    Wrapped(ChatHistory),
}

fn payload_as<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

impl ServerMessage {
    /// Interpret an envelope. Unrecognised kinds decode to
    /// [`ServerMessage::Unknown`] instead of failing.
    pub fn decode(envelope: Envelope) -> Result<Self, DecodeError> {
        let Envelope { kind, payload } = envelope;
        let message = match kind.as_str() {
            "STATUS_UPDATE" => match payload_as::<StatusPayload>(&kind, payload)? {
                StatusPayload::Bare(status) => ServerMessage::StatusUpdate(StatusUpdate {
                    status,
                    message: String::new(),
                }),
                StatusPayload::Full(update) => ServerMessage::StatusUpdate(update),
            },
            "CHAT_DELTA" => ServerMessage::ChatDelta(payload_as(&kind, payload)?),
            "SUGGESTIONS_UPDATE" => ServerMessage::SuggestionsUpdate(payload_as(&kind, payload)?),
            "CHAT_HISTORY" => {
                let messages = match payload_as::<HistoryPayload>(&kind, payload)? {
                    HistoryPayload::Bare(messages) => messages,
                    HistoryPayload::Wrapped(history) => history.messages,
                };
                ServerMessage::ChatHistory(ChatHistory { messages })
            }
            "ARTIFACT_OPEN" => ServerMessage::ArtifactOpen(payload_as(&kind, payload)?),
            "ARTIFACT_UPDATE" => ServerMessage::ArtifactUpdate(payload_as(&kind, payload)?),
            "ARTIFACT_SYNC_EVENT" => ServerMessage::ArtifactSyncEvent(payload_as(&kind, payload)?),
            "ARTIFACT_VISUAL_SYNC" => {
                ServerMessage::ArtifactVisualSync(payload_as(&kind, payload)?)
            }
            "SESSION_ESTABLISHED" => {
                ServerMessage::SessionEstablished(payload_as(&kind, payload)?)
            }
            "STATE_UPDATE" => ServerMessage::StateUpdate(payload_as(&kind, payload)?),
            "VALIDATION_WARN" => ServerMessage::ValidationWarn(payload_as(&kind, payload)?),
            _ => ServerMessage::Unknown { kind: kind.clone() },
        };
        Ok(message)
    }

    /// Wire `type` tag
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::StatusUpdate(_) => "STATUS_UPDATE",
            ServerMessage::ChatDelta(_) => "CHAT_DELTA",
            ServerMessage::SuggestionsUpdate(_) => "SUGGESTIONS_UPDATE",
            ServerMessage::ChatHistory(_) => "CHAT_HISTORY",
            ServerMessage::ArtifactOpen(_) => "ARTIFACT_OPEN",
            ServerMessage::ArtifactUpdate(_) => "ARTIFACT_UPDATE",
            ServerMessage::ArtifactSyncEvent(_) => "ARTIFACT_SYNC_EVENT",
            ServerMessage::ArtifactVisualSync(_) => "ARTIFACT_VISUAL_SYNC",
            ServerMessage::SessionEstablished(_) => "SESSION_ESTABLISHED",
            ServerMessage::StateUpdate(_) => "STATE_UPDATE",
            ServerMessage::ValidationWarn(_) => "VALIDATION_WARN",
            ServerMessage::Unknown { kind } => kind,
        }
    }
}
