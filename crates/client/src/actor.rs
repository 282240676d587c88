//! Client actor - owns every store and processes commands sequentially.
//!
//! Inbound envelopes, local edits and timer fires all arrive as
//! `ClientCommand`s on one channel, so no two mutations ever interleave.
//! Readers get lock-free snapshots through `ArcSwap`, refreshed after every
//! command, plus a revision counter on a `watch` channel.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use analyst_protocol::{
    Artifact, ClientMessage, ContentError, Envelope, ServerMessage, StructuredDocument,
    VisualFormat,
};
use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactVisual;
use crate::chat::{AttachmentSource, Message};
use crate::error::ClientError;
use crate::identity::SessionIdentity;
use crate::router::{route, ClientState, Effect};
use crate::saves::{SavePipeline, DEFAULT_SAVE_DEBOUNCE};
use crate::socket::{ConnectionPhase, ReconnectPolicy, SocketClient, Subscription};

pub const DEFAULT_STATUS_DISMISS: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    pub reconnect: ReconnectPolicy,
    pub save_debounce: Duration,
    pub status_dismiss: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            status_dismiss: DEFAULT_STATUS_DISMISS,
        }
    }
}

/// Turns an artifact into its re-serialized, edited content
pub type DocumentEdit = Box<dyn FnOnce(&Artifact) -> Result<String, ContentError> + Send>;

pub enum ClientCommand {
    /// A frame from the socket (or injected by a caller)
    Inbound(Envelope),
    SendUserMessage {
        text: String,
    },
    EditArtifact {
        id: String,
        content: String,
    },
    EditDocument {
        id: String,
        edit: DocumentEdit,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    OpenArtifact(Artifact),
    CloseArtifact {
        id: String,
    },
    SelectArtifact {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    AddAttachment {
        source: AttachmentSource,
        reply: oneshot::Sender<String>,
    },
    RemoveAttachment {
        id: String,
    },
    ClearAttachments,
    SyncVisual {
        id: String,
        visual_data: String,
        format: VisualFormat,
    },
    Publish {
        target: String,
    },
    ResetConversation {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    StatusDismissFired {
        generation: u64,
    },
    /// Replies once every earlier command has been applied
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Handle to the running client (cheap to clone)
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    snapshot: Arc<ArcSwap<ClientState>>,
    revision: watch::Receiver<u64>,
    socket: SocketClient,
}

impl ClientHandle {
    /// Start the client: connect the socket and spawn the event loop.
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        identity: SessionIdentity,
        server_url: impl Into<String>,
        timings: Timings,
    ) -> Result<ClientHandle, ClientError> {
        let server_url = server_url.into();
        let url = identity.connection_url(&server_url)?;

        let socket = SocketClient::new(timings.reconnect);
        let saves = SavePipeline::new(Arc::new(socket.clone()), timings.save_debounce);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(ArcSwap::from_pointee(ClientState::default()));
        let (revision_tx, revision_rx) = watch::channel(0u64);

        let inbound = command_tx.downgrade();
        let subscription = socket.on_message(move |envelope| {
            if let Some(tx) = inbound.upgrade() {
                let _ = tx.send(ClientCommand::Inbound(envelope.clone()));
            }
        });

        let actor = ClientActor {
            state: ClientState::default(),
            identity,
            socket: socket.clone(),
            saves,
            server_url,
            timings,
            status_timer: None,
            status_generation: 0,
            commands: command_tx.downgrade(),
            snapshot: Arc::clone(&snapshot),
            revision: revision_tx,
            subscription: Some(subscription),
        };

        socket.connect(url);
        tokio::spawn(actor.run(command_rx));

        Ok(ClientHandle {
            commands: command_tx,
            snapshot,
            revision: revision_rx,
            socket,
        })
    }

    /// Lock-free snapshot read
    pub fn snapshot(&self) -> Arc<ClientState> {
        self.snapshot.load_full()
    }

    /// Receiver that changes after every applied command
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    pub fn connection_state(&self) -> ConnectionPhase {
        self.socket.state()
    }

    pub fn command(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| {
            warn!(
                component = "client_actor",
                event = "client.command.dropped",
                "Actor channel closed, command dropped"
            );
            ClientError::ActorClosed
        })
    }

    /// Feed an envelope through the router as if the server had sent it
    pub fn inject(&self, envelope: Envelope) -> Result<(), ClientError> {
        self.command(ClientCommand::Inbound(envelope))
    }

    pub fn send_message(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(ClientCommand::SendUserMessage { text: text.into() })
    }

    /// Apply a local edit now and save it after the debounce window
    pub fn edit_artifact(
        &self,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.command(ClientCommand::EditArtifact {
            id: id.into(),
            content: content.into(),
        })
    }

    /// Parse an artifact as `D`, mutate it and feed the re-serialized
    /// content into the edit path.
    pub async fn edit_document<D, F>(&self, id: &str, edit: F) -> Result<(), ClientError>
    where
        D: StructuredDocument + 'static,
        F: FnOnce(&mut D) -> Result<(), ContentError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let edit: DocumentEdit = Box::new(move |artifact: &Artifact| {
            let mut document = D::from_artifact(artifact)?;
            edit(&mut document)?;
            document.to_content()
        });
        self.command(ClientCommand::EditDocument {
            id: id.to_string(),
            edit,
            reply,
        })?;
        rx.await.map_err(|_| ClientError::ActorClosed)?
    }

    pub fn open_artifact(&self, artifact: Artifact) -> Result<(), ClientError> {
        self.command(ClientCommand::OpenArtifact(artifact))
    }

    pub fn close_artifact(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.command(ClientCommand::CloseArtifact { id: id.into() })
    }

    pub async fn select_artifact(&self, id: impl Into<String>) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::SelectArtifact {
            id: id.into(),
            reply,
        })?;
        rx.await.map_err(|_| ClientError::ActorClosed)
    }

    pub async fn add_attachment(&self, source: AttachmentSource) -> Result<String, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::AddAttachment { source, reply })?;
        rx.await.map_err(|_| ClientError::ActorClosed)
    }

    pub fn remove_attachment(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.command(ClientCommand::RemoveAttachment { id: id.into() })
    }

    pub fn clear_attachments(&self) -> Result<(), ClientError> {
        self.command(ClientCommand::ClearAttachments)
    }

    pub fn sync_visual(
        &self,
        id: impl Into<String>,
        visual_data: impl Into<String>,
        format: VisualFormat,
    ) -> Result<(), ClientError> {
        self.command(ClientCommand::SyncVisual {
            id: id.into(),
            visual_data: visual_data.into(),
            format,
        })
    }

    pub fn publish(&self, target: impl Into<String>) -> Result<(), ClientError> {
        self.command(ClientCommand::Publish {
            target: target.into(),
        })
    }

    /// Start over: clear every store and the session, then reconnect
    /// without a session id.
    pub async fn reset_conversation(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::ResetConversation { reply })?;
        rx.await.map_err(|_| ClientError::ActorClosed)?
    }

    pub async fn flush(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Flush { reply })?;
        rx.await.map_err(|_| ClientError::ActorClosed)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
    }
}

struct ClientActor {
    state: ClientState,
    identity: SessionIdentity,
    socket: SocketClient,
    saves: SavePipeline,
    server_url: String,
    timings: Timings,
    status_timer: Option<JoinHandle<()>>,
    status_generation: u64,
    commands: mpsc::WeakUnboundedSender<ClientCommand>,
    snapshot: Arc<ArcSwap<ClientState>>,
    revision: watch::Sender<u64>,
    subscription: Option<Subscription>,
}

impl ClientActor {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ClientCommand>) {
        info!(
            component = "client_actor",
            event = "client.actor.started",
            "Client event loop started"
        );
        while let Some(command) = command_rx.recv().await {
            if matches!(command, ClientCommand::Shutdown) {
                break;
            }
            self.handle(command);
            self.publish();
        }
        self.stop();
    }

    fn handle(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Inbound(envelope) => self.handle_inbound(envelope),

            ClientCommand::SendUserMessage { text } => {
                let mut message = Message::user(text.clone(), now_millis());
                message.attachments = self.state.chat.take_attachments();
                self.state.chat.add_message(message);
                self.socket.send_user_message(text);
            }

            ClientCommand::EditArtifact { id, content } => {
                if self.state.artifacts.contains(&id) {
                    self.apply_local_edit(&id, content);
                } else {
                    warn!(
                        component = "client_actor",
                        event = "client.edit.not_open",
                        artifact_id = %id,
                        "Edit for an artifact that is not open"
                    );
                }
            }

            ClientCommand::EditDocument { id, edit, reply } => {
                let result = match self.state.artifacts.get(&id) {
                    None => Err(ClientError::ArtifactNotOpen(id.clone())),
                    Some(open) => edit(&open.artifact).map_err(ClientError::from),
                };
                let result = result.map(|content| self.apply_local_edit(&id, content));
                let _ = reply.send(result);
            }

            ClientCommand::OpenArtifact(artifact) => {
                self.state.artifacts.open(artifact);
            }

            // A pending save for the artifact still fires
            ClientCommand::CloseArtifact { id } => {
                self.state.artifacts.remove(&id);
            }

            ClientCommand::SelectArtifact { id, reply } => {
                let _ = reply.send(self.state.artifacts.set_active(&id));
            }

            ClientCommand::AddAttachment { source, reply } => {
                let _ = reply.send(self.state.chat.add_attachment(source));
            }

            ClientCommand::RemoveAttachment { id } => {
                self.state.chat.remove_attachment(&id);
            }

            ClientCommand::ClearAttachments => self.state.chat.clear_attachments(),

            ClientCommand::SyncVisual {
                id,
                visual_data,
                format,
            } => {
                self.state.artifacts.set_visual(
                    &id,
                    ArtifactVisual {
                        visual_data: visual_data.clone(),
                        format,
                    },
                );
                self.socket.send(&ClientMessage::ArtifactVisualSync {
                    id,
                    visual_data,
                    format,
                });
            }

            ClientCommand::Publish { target } => {
                self.socket.send(&ClientMessage::ProjectPublish { target });
            }

            ClientCommand::ResetConversation { reply } => {
                let _ = reply.send(self.reset_conversation());
            }

            ClientCommand::StatusDismissFired { generation } => {
                if generation == self.status_generation {
                    self.status_timer = None;
                    self.state.chat.dismiss_status();
                }
            }

            ClientCommand::Flush { reply } => {
                let _ = reply.send(());
            }

            ClientCommand::Shutdown => {}
        }
    }

    fn handle_inbound(&mut self, envelope: Envelope) {
        let message = match ServerMessage::decode(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    component = "client_actor",
                    event = "client.inbound.decode_failed",
                    error = %e,
                    "Dropping malformed server message"
                );
                return;
            }
        };
        debug!(
            component = "client_actor",
            event = "client.inbound",
            kind = %message.kind(),
            "Routing server message"
        );

        let state = std::mem::take(&mut self.state);
        let (state, effects) = route(state, message, now_millis());
        self.state = state;
        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::CancelStatusDismiss => self.cancel_status_dismiss(),
            Effect::ScheduleStatusDismiss => self.schedule_status_dismiss(),
            Effect::PersistSession(session_id) => {
                if let Err(e) = self.identity.set_session_id(&session_id) {
                    warn!(
                        component = "client_actor",
                        event = "client.session.persist_failed",
                        session_id = %session_id,
                        error = %e,
                        "Failed to persist session id"
                    );
                }
                match self.identity.connection_url(&self.server_url) {
                    Ok(url) => self.socket.retarget(url),
                    Err(e) => warn!(
                        component = "client_actor",
                        event = "client.session.retarget_failed",
                        error = %e,
                        "Could not rebuild connection URL"
                    ),
                }
                info!(
                    component = "client_actor",
                    event = "client.session.established",
                    session_id = %session_id,
                    "Session established"
                );
            }
        }
    }

    /// Optimistic local edit followed by a debounced save
    fn apply_local_edit(&mut self, id: &str, content: String) {
        self.state.artifacts.update_content(id, content.clone());
        self.saves
            .schedule_save(&mut self.state.artifacts, id, content);
    }

    fn schedule_status_dismiss(&mut self) {
        self.cancel_status_dismiss();
        let generation = self.status_generation;
        let delay = self.timings.status_dismiss;
        let commands = self.commands.clone();
        self.status_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(ClientCommand::StatusDismissFired { generation });
            }
        }));
    }

    fn cancel_status_dismiss(&mut self) {
        self.status_generation += 1;
        if let Some(timer) = self.status_timer.take() {
            timer.abort();
        }
    }

    fn reset_conversation(&mut self) -> Result<(), ClientError> {
        self.saves.cancel_all();
        self.cancel_status_dismiss();
        self.state.reset();
        self.identity.clear_session()?;

        let url = self.identity.connection_url(&self.server_url)?;
        self.socket.disconnect();
        self.socket.connect(url);
        info!(
            component = "client_actor",
            event = "client.conversation.reset",
            "Conversation reset"
        );
        Ok(())
    }

    /// Store a new snapshot. Messages and artifacts are `Arc`-shared, so
    /// this copies pointers, not document content.
    fn publish(&self) {
        self.snapshot.store(Arc::new(self.state.clone()));
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn stop(&mut self) {
        self.cancel_status_dismiss();
        self.saves.cancel_all();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.socket.disconnect();
        info!(
            component = "client_actor",
            event = "client.actor.stopped",
            "Client event loop stopped"
        );
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
