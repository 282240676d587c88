//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::server::Envelope;
use crate::types::VisualFormat;

fn default_publish_target() -> String {
    "confluence".to_string()
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ClientMessage {
    /// A chat turn typed by the user
    UserMessage(String),

    /// Local edit of an artifact's serialized content
    ArtifactEdit { id: String, content: String },

    /// Rendered diagram pushed back to the server
    ArtifactVisualSync {
        id: String,
        visual_data: String,
        #[serde(default)]
        format: VisualFormat,
    },

    /// Publish the project to an external target
    ProjectPublish {
        #[serde(default = "default_publish_target")]
        target: String,
    },
}

impl ClientMessage {
    /// Wire `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::UserMessage(_) => "USER_MESSAGE",
            ClientMessage::ArtifactEdit { .. } => "ARTIFACT_EDIT",
            ClientMessage::ArtifactVisualSync { .. } => "ARTIFACT_VISUAL_SYNC",
            ClientMessage::ProjectPublish { .. } => "PROJECT_PUBLISH",
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientMessage;
    use crate::types::VisualFormat;

    #[test]
    fn user_message_payload_is_a_bare_string() {
        let json = serde_json::to_string(&ClientMessage::UserMessage("hello".into()))
            .expect("serialize");
        assert_eq!(json, r#"{"type":"USER_MESSAGE","payload":"hello"}"#);
    }

    #[test]
    fn artifact_edit_serializes_id_and_content() {
        let msg = ClientMessage::ArtifactEdit {
            id: "a1".into(),
            content: "graph TD; A-->B".into(),
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "ARTIFACT_EDIT");
        assert_eq!(value["payload"]["id"], "a1");
        assert_eq!(value["payload"]["content"], "graph TD; A-->B");
        assert_eq!(msg.kind(), "ARTIFACT_EDIT");
    }

    #[test]
    fn visual_sync_uses_snake_case_fields() {
        let msg = ClientMessage::ArtifactVisualSync {
            id: "diagram".into(),
            visual_data: "<svg/>".into(),
            format: VisualFormat::Svg,
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["payload"]["visual_data"], "<svg/>");
        assert_eq!(value["payload"]["format"], "svg");
    }

    #[test]
    fn publish_target_defaults_to_confluence() {
        let json = r#"{"type":"PROJECT_PUBLISH","payload":{}}"#;
        let parsed: ClientMessage = serde_json::from_str(json).expect("parse publish");
        assert_eq!(
            parsed,
            ClientMessage::ProjectPublish {
                target: "confluence".into()
            }
        );
    }

    #[test]
    fn envelope_keeps_kind_and_payload() {
        let envelope = ClientMessage::ProjectPublish {
            target: "jira".into(),
        }
        .to_envelope()
        .expect("envelope");
        assert_eq!(envelope.kind, "PROJECT_PUBLISH");
        assert_eq!(envelope.payload["target"], "jira");
    }
}
