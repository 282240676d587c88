//! Inbound event routing
//!
//! Every server message is applied to the client stores by one pure,
//! synchronous function: `route(state, message) -> (state, effects)`.
//! No IO, no timers, no socket: anything like that comes back as an
//! [`Effect`] for the event loop to run.

use analyst_protocol::ServerMessage;
use tracing::debug;

use crate::artifacts::{ArtifactStore, ArtifactVisual};
use crate::chat::{ChatStore, Message};
use crate::project::ProjectStore;

/// Everything the client knows, one slice per store
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub chat: ChatStore,
    pub artifacts: ArtifactStore,
    pub project: ProjectStore,
}

impl ClientState {
    /// Drop the conversation, its documents and the project snapshot
    pub fn reset(&mut self) {
        self.chat.reset();
        self.chat.dismiss_status();
        self.chat.set_suggestions(Vec::new());
        self.artifacts.reset();
        self.project.reset();
    }
}

/// Side effects requested by a routed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Drop any pending status revert
    CancelStatusDismiss,
    /// Revert the status to idle after the dismiss delay
    ScheduleStatusDismiss,
    /// Remember the server-assigned session
    PersistSession(String),
}

/// Apply one inbound message. `now` is milliseconds since the Unix epoch.
pub fn route(mut state: ClientState, message: ServerMessage, now: u64) -> (ClientState, Vec<Effect>) {
    let mut effects = Vec::new();

    match message {
        // -- Chat -------------------------------------------------------------
        ServerMessage::ChatHistory(history) => {
            let messages = history
                .messages
                .into_iter()
                .map(|raw| Message::from_history(raw, now))
                .collect();
            state.chat.set_messages(messages);
        }

        ServerMessage::ChatDelta(delta) => {
            state.chat.apply_delta(&delta, now);
        }

        ServerMessage::StatusUpdate(update) => {
            let auto_dismiss = update.status.auto_dismisses();
            state.chat.set_status(update.status, update.message);
            effects.push(Effect::CancelStatusDismiss);
            if auto_dismiss {
                effects.push(Effect::ScheduleStatusDismiss);
            }
        }

        ServerMessage::SuggestionsUpdate(suggestions) => {
            state.chat.set_suggestions(suggestions);
        }

        // -- Artifacts --------------------------------------------------------
        ServerMessage::ArtifactOpen(artifact) => {
            state.artifacts.open(artifact);
        }

        ServerMessage::ArtifactUpdate(update) => {
            if !state.artifacts.update_content(&update.id, update.content) {
                debug!(
                    component = "router",
                    event = "router.artifact_update.unknown",
                    artifact_id = %update.id,
                    "Update for an artifact that is not open"
                );
            }
        }

        ServerMessage::ArtifactSyncEvent(sync) => {
            state
                .artifacts
                .set_sync_status(&sync.id, sync.status, sync.message);
        }

        ServerMessage::ArtifactVisualSync(visual) => {
            state.artifacts.set_visual(
                &visual.id,
                ArtifactVisual {
                    visual_data: visual.visual_data,
                    format: visual.format,
                },
            );
        }

        // -- Session and project state ----------------------------------------
        ServerMessage::SessionEstablished(established) => {
            if let Some(session_id) = established.session_id.filter(|s| !s.is_empty()) {
                effects.push(Effect::PersistSession(session_id));
            }
        }

        ServerMessage::StateUpdate(snapshot) => {
            state.project.set_snapshot(snapshot);
        }

        ServerMessage::ValidationWarn(warning) => {
            state.project.set_validation(warning);
        }

        ServerMessage::Unknown { kind } => {
            debug!(
                component = "router",
                event = "router.unknown_kind",
                kind = %kind,
                "Ignoring unknown message kind"
            );
        }
    }

    (state, effects)
}
