//! Core types shared across the protocol

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Kind of document shown in the artifact pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Code,
    Markdown,
    Json,
    Html,
    Pdf,
    Mermaid,
    Workbook,
    Stories,
    UseCase,
}

impl ArtifactType {
    /// Whether `content` carries a JSON-encoded structured document
    pub fn is_structured(self) -> bool {
        matches!(
            self,
            ArtifactType::Json
                | ArtifactType::Workbook
                | ArtifactType::Stories
                | ArtifactType::UseCase
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Markdown => "markdown",
            ArtifactType::Json => "json",
            ArtifactType::Html => "html",
            ArtifactType::Pdf => "pdf",
            ArtifactType::Mermaid => "mermaid",
            ArtifactType::Workbook => "workbook",
            ArtifactType::Stories => "stories",
            ArtifactType::UseCase => "use-case",
        }
    }
}

/// A server-generated or user-edited document.
///
/// `content` is always the authoritative serialized form. Structured kinds
/// (workbook, stories, use cases) hold JSON text here, never parsed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Save state of an artifact as reported by the client or the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSyncStatus {
    Saving,
    Processing,
    Synced,
    Error,
}

/// What the assistant is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    #[default]
    Idle,
    Thinking,
    Working,
    Success,
    Error,
}

impl SystemStatus {
    /// Statuses that revert to idle on their own after a while
    pub fn auto_dismisses(self) -> bool {
        matches!(self, SystemStatus::Success | SystemStatus::Error)
    }

    /// Statuses that mean the assistant stopped producing output
    pub fn ends_turn(self) -> bool {
        matches!(
            self,
            SystemStatus::Idle | SystemStatus::Success | SystemStatus::Error
        )
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Map a free-form wire role onto a known role. Anything unrecognised
    /// (including an empty string) becomes `System`.
    pub fn from_wire(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::System,
        }
    }
}

/// A persisted conversation turn as the server stores it.
///
/// A `null` or non-string role or content reads as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub role: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub content: String,
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        _ => String::new(),
    })
}

/// `STATUS_UPDATE` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SystemStatus,
    #[serde(default)]
    pub message: String,
}

/// `ARTIFACT_UPDATE` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContentUpdate {
    pub id: String,
    pub content: String,
}

/// `ARTIFACT_SYNC_EVENT` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSync {
    pub id: String,
    pub status: ArtifactSyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `CHAT_HISTORY` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
}

/// `SESSION_ESTABLISHED` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablished {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_new: bool,
}

/// Encoding of a rendered diagram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualFormat {
    #[default]
    Svg,
    Png,
}

/// `ARTIFACT_VISUAL_SYNC` payload as sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactVisual {
    pub id: String,
    /// Raw SVG markup or base64 PNG data
    pub visual_data: String,
    #[serde(default)]
    pub format: VisualFormat,
}

// ---------------------------------------------------------------------------
// Project state snapshot (STATE_UPDATE)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub session_id: String,
    #[serde(default)]
    pub project_scope: Option<String>,
    #[serde(default)]
    pub actors: Vec<Persona>,
    #[serde(default)]
    pub process_steps: Vec<ProcessStep>,
    #[serde(default)]
    pub goal: Option<BusinessGoal>,
    #[serde(default)]
    pub data_entities: Vec<DataEntity>,
    #[serde(default)]
    pub nfrs: Vec<NonFunctionalRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub role_name: String,
    #[serde(default)]
    pub responsibilities: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    pub step_id: i64,
    pub actor: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessGoal {
    pub main_goal: String,
    #[serde(default)]
    pub success_metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntity {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonFunctionalRequirement {
    pub id: String,
    pub category: String,
    pub requirement: String,
}

// ---------------------------------------------------------------------------
// Validation warnings (VALIDATION_WARN)
// ---------------------------------------------------------------------------

fn default_issue_category() -> String {
    "policy".to_string()
}

fn default_safety_score() -> u32 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: String,
    #[serde(default = "default_issue_category")]
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub issues: Vec<ValidationIssue>,
    #[serde(default = "default_safety_score")]
    pub safety_score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_uses_kebab_case_on_the_wire() {
        let parsed: ArtifactType = serde_json::from_str(r#""use-case""#).expect("parse");
        assert_eq!(parsed, ArtifactType::UseCase);
        assert_eq!(
            serde_json::to_string(&ArtifactType::Mermaid).expect("serialize"),
            r#""mermaid""#
        );
        assert_eq!(ArtifactType::UseCase.as_str(), "use-case");
    }

    #[test]
    fn unknown_roles_normalize_to_system() {
        assert_eq!(MessageRole::from_wire("assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::from_wire(" User "), MessageRole::User);
        assert_eq!(MessageRole::from_wire("tool"), MessageRole::System);
        assert_eq!(MessageRole::from_wire(""), MessageRole::System);
    }

    #[test]
    fn chat_message_tolerates_null_and_non_string_fields() {
        let parsed: Vec<ChatMessage> = serde_json::from_str(
            r#"[{"role":null,"content":"a"},{"role":7,"content":null},{"content":"b"}]"#,
        )
        .expect("parse");
        assert_eq!(parsed[0].role, "");
        assert_eq!(parsed[0].content, "a");
        assert_eq!(parsed[1].role, "");
        assert_eq!(parsed[1].content, "");
        assert_eq!(parsed[2].role, "");
    }

    #[test]
    fn validation_warning_fills_defaults() {
        let json = r#"{"issues":[{"severity":"high","message":"No actors"}]}"#;
        let parsed: ValidationWarning = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.safety_score, 100);
        assert_eq!(parsed.issues[0].category, "policy");
    }

    #[test]
    fn state_snapshot_accepts_sparse_payload() {
        let json = r#"{"sessionId":"s-1","actors":[{"roleName":"Clerk"}]}"#;
        let parsed: StateSnapshot = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.session_id, "s-1");
        assert_eq!(parsed.actors[0].role_name, "Clerk");
        assert!(parsed.process_steps.is_empty());
        assert!(parsed.goal.is_none());
    }
}
