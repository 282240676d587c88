//! Artifact store - the open documents, the active tab and per-document
//! sync status.

use std::sync::Arc;

use analyst_protocol::{Artifact, ArtifactSyncStatus, ArtifactType, VisualFormat};
use tracing::debug;

/// Rendered form of a diagram, pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactVisual {
    pub visual_data: String,
    pub format: VisualFormat,
}

/// An open artifact plus client-side sync bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct UiArtifact {
    pub artifact: Artifact,
    pub sync_status: ArtifactSyncStatus,
    pub last_sync_message: Option<String>,
    pub visual: Option<ArtifactVisual>,
}

impl UiArtifact {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            sync_status: ArtifactSyncStatus::Synced,
            last_sync_message: None,
            visual: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.artifact.id
    }

    pub fn title(&self) -> &str {
        &self.artifact.title
    }

    pub fn content(&self) -> &str {
        &self.artifact.content
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact.artifact_type
    }
}

/// What [`ArtifactStore::open`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Added,
    /// Already open; only the selection moved
    Activated,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    /// Shared with published snapshots; edits copy only the touched artifact
    artifacts: Vec<Arc<UiArtifact>>,
    active_artifact_id: Option<String>,
}

impl ArtifactStore {
    pub fn artifacts(&self) -> &[Arc<UiArtifact>] {
        &self.artifacts
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_artifact_id.as_deref()
    }

    pub fn active(&self) -> Option<&UiArtifact> {
        self.active_id().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&UiArtifact> {
        self.artifacts.iter().find(|a| a.id() == id).map(Arc::as_ref)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut UiArtifact> {
        self.artifacts
            .iter_mut()
            .find(|a| a.id() == id)
            .map(Arc::make_mut)
    }

    /// Open an artifact and make it active. An id that is already open is
    /// only re-selected; its content is left alone.
    pub fn open(&mut self, artifact: Artifact) -> OpenOutcome {
        let id = artifact.id.clone();
        let outcome = if self.contains(&id) {
            OpenOutcome::Activated
        } else {
            self.artifacts.push(Arc::new(UiArtifact::new(artifact)));
            OpenOutcome::Added
        };
        debug!(
            component = "artifact_store",
            event = "artifact.opened",
            artifact_id = %id,
            outcome = ?outcome,
            "Artifact opened"
        );
        self.active_artifact_id = Some(id);
        outcome
    }

    /// Replace an artifact's content. Sync status and selection are kept.
    pub fn update_content(&mut self, id: &str, content: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(artifact) => {
                artifact.artifact.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn set_sync_status(
        &mut self,
        id: &str,
        status: ArtifactSyncStatus,
        message: Option<String>,
    ) -> bool {
        match self.get_mut(id) {
            Some(artifact) => {
                artifact.sync_status = status;
                artifact.last_sync_message = message;
                true
            }
            None => false,
        }
    }

    pub fn set_visual(&mut self, id: &str, visual: ArtifactVisual) -> bool {
        match self.get_mut(id) {
            Some(artifact) => {
                artifact.visual = Some(visual);
                true
            }
            None => false,
        }
    }

    /// Close an artifact. Closing the active one selects its left
    /// neighbour, else whatever slid into its slot, else nothing.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.artifacts.iter().position(|a| a.id() == id) else {
            return false;
        };
        self.artifacts.remove(index);

        if self.active_artifact_id.as_deref() == Some(id) {
            self.active_artifact_id = if self.artifacts.is_empty() {
                None
            } else {
                let next = index.saturating_sub(1);
                Some(self.artifacts[next].id().to_string())
            };
        }
        true
    }

    /// Select an open artifact. Unknown ids are rejected.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active_artifact_id = Some(id.to_string());
        true
    }

    pub fn reset(&mut self) {
        self.artifacts.clear();
        self.active_artifact_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str) -> Artifact {
        Artifact {
            id: id.to_string(),
            artifact_type: ArtifactType::Markdown,
            title: format!("Doc {id}"),
            content: format!("# {id}"),
            language: None,
        }
    }

    fn store_with(ids: &[&str]) -> ArtifactStore {
        let mut store = ArtifactStore::default();
        for id in ids {
            store.open(artifact(id));
        }
        store
    }

    fn ids(store: &ArtifactStore) -> Vec<&str> {
        store.artifacts().iter().map(|a| a.id()).collect()
    }

    #[test]
    fn open_adds_and_activates() {
        let store = store_with(&["a", "b"]);
        assert_eq!(ids(&store), ["a", "b"]);
        assert_eq!(store.active_id(), Some("b"));
        assert_eq!(store.get("a").expect("a").sync_status, ArtifactSyncStatus::Synced);
    }

    #[test]
    fn reopening_only_switches_selection() {
        let mut store = store_with(&["a", "b"]);
        store.update_content("a", "edited");

        let mut replacement = artifact("a");
        replacement.content = "server copy".into();
        assert_eq!(store.open(replacement), OpenOutcome::Activated);

        assert_eq!(ids(&store), ["a", "b"]);
        assert_eq!(store.active_id(), Some("a"));
        assert_eq!(store.get("a").expect("a").content(), "edited");
    }

    #[test]
    fn update_content_keeps_status_and_selection() {
        let mut store = store_with(&["a", "b"]);
        store.set_sync_status("a", ArtifactSyncStatus::Saving, None);
        assert!(store.update_content("a", "new"));
        assert!(!store.update_content("zzz", "new"));

        let a = store.get("a").expect("a");
        assert_eq!(a.content(), "new");
        assert_eq!(a.sync_status, ArtifactSyncStatus::Saving);
        assert_eq!(store.active_id(), Some("b"));
    }

    #[test]
    fn removing_active_prefers_left_neighbour() {
        let mut store = store_with(&["a", "b", "c"]);
        store.set_active("b");
        store.remove("b");
        assert_eq!(store.active_id(), Some("a"));
    }

    #[test]
    fn removing_first_active_selects_new_first() {
        let mut store = store_with(&["a", "b", "c"]);
        store.set_active("a");
        store.remove("a");
        assert_eq!(store.active_id(), Some("b"));
    }

    #[test]
    fn removing_last_artifact_clears_selection() {
        let mut store = store_with(&["a"]);
        assert!(store.remove("a"));
        assert_eq!(store.active_id(), None);
        assert!(!store.remove("a"));
    }

    #[test]
    fn removing_inactive_keeps_selection() {
        let mut store = store_with(&["a", "b", "c"]);
        store.remove("a");
        assert_eq!(store.active_id(), Some("c"));
    }

    #[test]
    fn set_active_rejects_unknown_ids() {
        let mut store = store_with(&["a"]);
        assert!(!store.set_active("ghost"));
        assert_eq!(store.active_id(), Some("a"));
    }

    #[test]
    fn selection_always_points_into_the_set() {
        // Deterministic walk over open/remove interleavings
        let mut store = ArtifactStore::default();
        let script = [
            ("open", "a"),
            ("open", "b"),
            ("open", "a"),
            ("open", "c"),
            ("remove", "a"),
            ("open", "d"),
            ("remove", "d"),
            ("remove", "b"),
            ("open", "b"),
            ("remove", "c"),
            ("remove", "b"),
        ];
        for (op, id) in script {
            match op {
                "open" => {
                    store.open(artifact(id));
                }
                _ => {
                    store.remove(id);
                }
            }
            let mut seen = ids(&store);
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), store.artifacts().len(), "duplicate ids after {op} {id}");
            match store.active_id() {
                None => assert!(store.artifacts().is_empty()),
                Some(active) => assert!(store.contains(active)),
            }
        }
        assert!(store.artifacts().is_empty());
    }

    #[test]
    fn sync_status_carries_message() {
        let mut store = store_with(&["a"]);
        store.set_sync_status("a", ArtifactSyncStatus::Error, Some("conflict".into()));
        let a = store.get("a").expect("a");
        assert_eq!(a.sync_status, ArtifactSyncStatus::Error);
        assert_eq!(a.last_sync_message.as_deref(), Some("conflict"));
    }

    #[test]
    fn cloned_store_shares_untouched_artifacts() {
        let mut store = store_with(&["a", "b"]);
        let snapshot = store.clone();

        store.update_content("b", "# edited");
        assert!(Arc::ptr_eq(&snapshot.artifacts()[0], &store.artifacts()[0]));
        assert_eq!(snapshot.get("b").expect("b").content(), "# b");
        assert_eq!(store.get("b").expect("b").content(), "# edited");
    }
}
