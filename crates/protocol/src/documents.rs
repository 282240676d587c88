//! Structured documents carried inside `Artifact.content`.
//!
//! The stores only ever hold the serialized string. Editors parse it with
//! these models, mutate, and hand a re-serialized string back.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Artifact, ArtifactType};

/// Artifact content could not be read as the expected document
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("artifact {id} is {actual:?}, expected {expected:?}")]
    WrongType {
        id: String,
        expected: ArtifactType,
        actual: ArtifactType,
    },

    #[error("malformed {expected:?} content: {source}")]
    Malformed {
        expected: ArtifactType,
        #[source]
        source: serde_json::Error,
    },

    #[error("no entry with id {0}")]
    NotFound(String),
}

/// A JSON document stored in an artifact of one specific type
pub trait StructuredDocument: Serialize + DeserializeOwned {
    const ARTIFACT_TYPE: ArtifactType;

    fn parse(content: &str) -> Result<Self, ContentError> {
        serde_json::from_str(content).map_err(|source| ContentError::Malformed {
            expected: Self::ARTIFACT_TYPE,
            source,
        })
    }

    /// Parse an artifact, checking its declared type first
    fn from_artifact(artifact: &Artifact) -> Result<Self, ContentError> {
        if artifact.artifact_type != Self::ARTIFACT_TYPE {
            return Err(ContentError::WrongType {
                id: artifact.id.clone(),
                expected: Self::ARTIFACT_TYPE,
                actual: artifact.artifact_type,
            });
        }
        Self::parse(&artifact.content)
    }

    /// Serialize with two-space indentation, the form the server emits
    fn to_content(&self) -> Result<String, ContentError> {
        serde_json::to_string_pretty(self).map_err(|source| ContentError::Malformed {
            expected: Self::ARTIFACT_TYPE,
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Workbook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookData {
    pub categories: Vec<WorkbookCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookCategory {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub items: Vec<WorkbookItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookItem {
    pub id: String,
    pub text: String,
}

impl StructuredDocument for WorkbookData {
    const ARTIFACT_TYPE: ArtifactType = ArtifactType::Workbook;
}

impl WorkbookData {
    /// Append an item to a category and return the new item's id
    pub fn add_item(&mut self, category_id: &str, text: &str) -> Result<String, ContentError> {
        let category = self
            .categories
            .iter_mut()
            .find(|c| c.id == category_id)
            .ok_or_else(|| ContentError::NotFound(category_id.to_string()))?;
        let id = crate::new_id();
        category.items.push(WorkbookItem {
            id: id.clone(),
            text: text.to_string(),
        });
        Ok(id)
    }

    pub fn remove_item(&mut self, item_id: &str) -> Result<(), ContentError> {
        for category in &mut self.categories {
            if let Some(pos) = category.items.iter().position(|i| i.id == item_id) {
                category.items.remove(pos);
                return Ok(());
            }
        }
        Err(ContentError::NotFound(item_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// User stories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStoryData {
    pub stories: Vec<UserStory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
    pub id: String,
    pub priority: Priority,
    pub estimate: String,
    pub role: String,
    pub action: String,
    pub benefit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl StructuredDocument for UserStoryData {
    const ARTIFACT_TYPE: ArtifactType = ArtifactType::Stories;
}

impl UserStoryData {
    /// Prepend a placeholder story and return its id.
    ///
    /// Ids follow the `US-<n>` scheme: one past the highest number in use,
    /// starting at 101. Ids freed by a delete are never handed out again
    /// while a higher one exists.
    pub fn add_story(&mut self) -> String {
        let next = self
            .stories
            .iter()
            .filter_map(|s| s.id.strip_prefix("US-")?.parse::<u64>().ok())
            .max()
            .map_or(101, |n| (n + 1).max(101));
        let id = format!("US-{next}");
        self.stories.insert(
            0,
            UserStory {
                id: id.clone(),
                priority: Priority::Medium,
                estimate: "?".to_string(),
                role: "User".to_string(),
                action: "do something".to_string(),
                benefit: "I get a benefit".to_string(),
                description: "New story description...".to_string(),
                goal: "Business Goal".to_string(),
                scope: Vec::new(),
                out_of_scope: Vec::new(),
                acceptance_criteria: Vec::new(),
            },
        );
        id
    }

    pub fn update_story(&mut self, story: UserStory) -> Result<(), ContentError> {
        let slot = self
            .stories
            .iter_mut()
            .find(|s| s.id == story.id)
            .ok_or_else(|| ContentError::NotFound(story.id.clone()))?;
        *slot = story;
        Ok(())
    }

    pub fn delete_story(&mut self, id: &str) -> Result<(), ContentError> {
        let before = self.stories.len();
        self.stories.retain(|s| s.id != id);
        if self.stories.len() == before {
            return Err(ContentError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Use cases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseData {
    pub use_cases: Vec<UseCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCase {
    pub id: String,
    pub title: String,
    pub primary_actor: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    #[serde(default)]
    pub main_flow: Vec<UseCaseStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseStep {
    pub step_number: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_flow: Option<String>,
}

impl StructuredDocument for UseCaseData {
    const ARTIFACT_TYPE: ArtifactType = ArtifactType::UseCase;
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORIES: &str = r#"{
      "stories": [
        {
          "id": "US-101",
          "priority": "High",
          "estimate": "5 SP",
          "role": "Admin",
          "action": "configure the settings",
          "benefit": "I can control access",
          "scope": ["Login", "MFA"],
          "outOfScope": ["Biometrics"],
          "acceptanceCriteria": ["User can login"]
        }
      ]
    }"#;

    fn artifact(kind: ArtifactType, content: &str) -> Artifact {
        Artifact {
            id: "art-1".into(),
            artifact_type: kind,
            title: "Doc".into(),
            content: content.into(),
            language: Some("json".into()),
        }
    }

    #[test]
    fn parses_user_stories_with_camel_case_lists() {
        let data = UserStoryData::parse(STORIES).expect("parse stories");
        assert_eq!(data.stories.len(), 1);
        assert_eq!(data.stories[0].out_of_scope, vec!["Biometrics"]);
        assert_eq!(data.stories[0].priority, Priority::High);
        assert_eq!(data.stories[0].description, "");
    }

    #[test]
    fn add_story_prepends_placeholder() {
        let mut data = UserStoryData::parse(STORIES).expect("parse stories");
        let id = data.add_story();
        assert_eq!(id, "US-102");
        assert_eq!(data.stories[0].id, "US-102");
        assert_eq!(data.stories[0].priority, Priority::Medium);
        assert_eq!(data.stories.len(), 2);

        let content = data.to_content().expect("serialize");
        assert!(content.contains("\"outOfScope\""));
        assert_eq!(UserStoryData::parse(&content).expect("reparse"), data);
    }

    #[test]
    fn delete_missing_story_reports_not_found() {
        let mut data = UserStoryData::parse(STORIES).expect("parse stories");
        assert!(matches!(
            data.delete_story("US-999"),
            Err(ContentError::NotFound(id)) if id == "US-999"
        ));
        data.delete_story("US-101").expect("delete");
        assert!(data.stories.is_empty());
    }

    #[test]
    fn story_ids_stay_unique_after_delete() {
        let mut data = UserStoryData { stories: Vec::new() };
        let first = data.add_story();
        let second = data.add_story();
        assert_eq!((first.as_str(), second.as_str()), ("US-101", "US-102"));

        data.delete_story(&first).expect("delete");
        let third = data.add_story();
        assert_eq!(third, "US-103");

        data.delete_story(&third).expect("delete");
        assert_eq!(data.stories.len(), 1);
        assert_eq!(data.stories[0].id, second);
    }

    #[test]
    fn story_ids_skip_past_foreign_ids() {
        let mut data = UserStoryData::parse(STORIES).expect("parse stories");
        data.stories[0].id = "STORY-A".to_string();
        assert_eq!(data.add_story(), "US-101");
        assert_eq!(data.add_story(), "US-102");
    }

    #[test]
    fn workbook_items_are_added_to_the_named_category() {
        let mut data = WorkbookData::parse(
            r#"{"categories":[{"id":"cat_1","title":"Goal & Scope","items":[{"id":"1","text":"Automate reporting."}]}]}"#,
        )
        .expect("parse workbook");
        let id = data.add_item("cat_1", "Scope: Q3 only").expect("add item");
        assert_eq!(data.categories[0].items.len(), 2);
        assert_eq!(data.categories[0].items[1].id, id);
        assert!(data.add_item("missing", "x").is_err());
        data.remove_item("1").expect("remove");
        assert_eq!(data.categories[0].items.len(), 1);
    }

    #[test]
    fn from_artifact_checks_type() {
        let err = WorkbookData::from_artifact(&artifact(ArtifactType::Stories, STORIES))
            .expect_err("wrong type");
        assert!(matches!(err, ContentError::WrongType { .. }));
    }

    #[test]
    fn malformed_content_is_an_error_not_a_panic() {
        let err = UseCaseData::from_artifact(&artifact(ArtifactType::UseCase, "{not json"))
            .expect_err("malformed");
        assert!(matches!(err, ContentError::Malformed { .. }));
    }

    #[test]
    fn parses_use_cases() {
        let json = r#"{"useCases":[{"id":"UC-1","title":"Login","primaryActor":"User","mainFlow":[{"stepNumber":1,"action":"Open app"}]}]}"#;
        let data = UseCaseData::parse(json).expect("parse use cases");
        assert_eq!(data.use_cases[0].primary_actor, "User");
        assert_eq!(data.use_cases[0].main_flow[0].step_number, 1);
        assert!(data.use_cases[0].preconditions.is_empty());
    }
}
