//! Layout preferences persisted under `ui-storage`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{KvStore, StorageError};

pub const UI_STORAGE_KEY: &str = "ui-storage";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Chat,
    #[default]
    Split,
    Artifact,
}

impl std::str::FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(LayoutMode::Chat),
            "split" => Ok(LayoutMode::Split),
            "artifact" => Ok(LayoutMode::Artifact),
            other => Err(format!("unknown layout mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPreferences {
    pub sidebar_open: bool,
    pub layout_mode: LayoutMode,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            sidebar_open: true,
            layout_mode: LayoutMode::Split,
        }
    }
}

/// Stored shape: `{"state": {...}, "version": 0}`
#[derive(Serialize, Deserialize)]
struct StoredPreferences {
    state: UiPreferences,
    #[serde(default)]
    version: u32,
}

pub struct Preferences {
    store: KvStore,
    current: UiPreferences,
}

impl Preferences {
    /// Load stored preferences, falling back to defaults when missing or
    /// unreadable.
    pub fn load(store: KvStore) -> Self {
        let current = match store.get_json::<StoredPreferences>(UI_STORAGE_KEY) {
            Ok(Some(stored)) => stored.state,
            Ok(None) => UiPreferences::default(),
            Err(e) => {
                warn!(
                    component = "preferences",
                    event = "preferences.load_failed",
                    error = %e,
                    "Stored UI preferences unreadable, using defaults"
                );
                UiPreferences::default()
            }
        };
        Self { store, current }
    }

    pub fn get(&self) -> UiPreferences {
        self.current
    }

    pub fn toggle_sidebar(&mut self) -> Result<bool, StorageError> {
        self.current.sidebar_open = !self.current.sidebar_open;
        self.save()?;
        Ok(self.current.sidebar_open)
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) -> Result<(), StorageError> {
        self.current.layout_mode = mode;
        self.save()
    }

    fn save(&self) -> Result<(), StorageError> {
        self.store.set_json(
            UI_STORAGE_KEY,
            &StoredPreferences {
                state: self.current,
                version: 0,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_split_with_sidebar_open() {
        let prefs = Preferences::load(KvStore::in_memory().expect("store"));
        assert_eq!(prefs.get(), UiPreferences::default());
        assert!(prefs.get().sidebar_open);
        assert_eq!(prefs.get().layout_mode, LayoutMode::Split);
    }

    #[test]
    fn changes_are_persisted() {
        let store = KvStore::in_memory().expect("store");
        let mut prefs = Preferences::load(store.clone());
        assert!(!prefs.toggle_sidebar().expect("toggle"));
        prefs.set_layout_mode(LayoutMode::Artifact).expect("set mode");

        let raw = store.get(UI_STORAGE_KEY).expect("get").expect("stored");
        assert!(raw.contains(r#""layoutMode":"artifact""#));

        let reloaded = Preferences::load(store);
        assert!(!reloaded.get().sidebar_open);
        assert_eq!(reloaded.get().layout_mode, LayoutMode::Artifact);
    }

    #[test]
    fn corrupt_value_falls_back_to_defaults() {
        let store = KvStore::in_memory().expect("store");
        store.set(UI_STORAGE_KEY, "][").expect("seed");
        assert_eq!(Preferences::load(store).get(), UiPreferences::default());
    }

    #[test]
    fn parses_layout_mode_names() {
        assert_eq!("Chat".parse::<LayoutMode>(), Ok(LayoutMode::Chat));
        assert!("wide".parse::<LayoutMode>().is_err());
    }
}
