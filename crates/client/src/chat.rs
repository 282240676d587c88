//! Chat store - conversation messages, assistant status, suggestion chips
//! and attachments waiting to be sent.
//!
//! Plain synchronous state. Every method is a complete mutation; callers
//! never observe a half-applied update.

use std::sync::Arc;

use analyst_protocol::{new_id, ChatMessage, MessageRole, SystemStatus};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Error,
}

/// A message as the chat pane shows it
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub status: Option<MessageStatus>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: new_id(),
            role: MessageRole::User,
            content: content.into(),
            timestamp,
            status: Some(MessageStatus::Complete),
            attachments: Vec::new(),
        }
    }

    /// Hydrate a stored history entry. Unknown roles become `System`.
    pub fn from_history(raw: ChatMessage, timestamp: u64) -> Self {
        Self {
            id: new_id(),
            role: MessageRole::from_wire(&raw.role),
            content: raw.content,
            timestamp,
            status: Some(MessageStatus::Complete),
            attachments: Vec::new(),
        }
    }
}

/// A file picked for the next outgoing message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// `data:` URL for images, `None` for everything else
    pub preview_url: Option<String>,
    pub data: Arc<[u8]>,
}

/// Raw file handed to [`ChatStore::add_attachment`]
#[derive(Debug, Clone)]
pub struct AttachmentSource {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatStore {
    /// Shared with published snapshots; edits copy only the touched message
    messages: Vec<Arc<Message>>,
    is_streaming: bool,
    status: SystemStatus,
    status_message: String,
    pending_attachments: Vec<Attachment>,
    suggestions: Vec<String>,
}

impl ChatStore {
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending_attachments
    }

    pub fn add_message(&mut self, message: Message) {
        self.finish_streaming();
        self.messages.push(Arc::new(message));
    }

    /// Replace the whole conversation
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        debug!(
            component = "chat_store",
            event = "chat.messages.replaced",
            count = messages.len(),
            "Replacing chat history"
        );
        self.messages = messages.into_iter().map(Arc::new).collect();
        self.is_streaming = false;
    }

    /// Append streamed assistant text.
    ///
    /// Deltas are always appended as received. When there is no trailing
    /// assistant message a new streaming one is started with the delta.
    pub fn apply_delta(&mut self, delta: &str, timestamp: u64) {
        match self.messages.last_mut() {
            Some(last) if last.role == MessageRole::Assistant => {
                let last = Arc::make_mut(last);
                last.content.push_str(delta);
                last.status = Some(MessageStatus::Streaming);
            }
            _ => {
                self.finish_streaming();
                self.messages.push(Arc::new(Message {
                    id: new_id(),
                    role: MessageRole::Assistant,
                    content: delta.to_string(),
                    timestamp,
                    status: Some(MessageStatus::Streaming),
                    attachments: Vec::new(),
                }));
            }
        }
        self.is_streaming = true;
    }

    /// Set the assistant status. Statuses that end a turn also close out
    /// the streaming message.
    pub fn set_status(&mut self, status: SystemStatus, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
        if status.ends_turn() {
            self.finish_streaming();
        }
    }

    pub fn dismiss_status(&mut self) {
        self.set_status(SystemStatus::Idle, "");
    }

    pub fn set_suggestions(&mut self, suggestions: Vec<String>) {
        self.suggestions = suggestions;
    }

    /// Queue a file for the next message and return its id. Images get an
    /// inline preview right away.
    pub fn add_attachment(&mut self, source: AttachmentSource) -> String {
        let is_image = source.mime_type.starts_with("image/");
        let preview_url = is_image.then(|| {
            format!(
                "data:{};base64,{}",
                source.mime_type,
                STANDARD.encode(&source.data)
            )
        });
        let id = new_id();
        self.pending_attachments.push(Attachment {
            id: id.clone(),
            name: source.name,
            mime_type: source.mime_type,
            size: source.data.len() as u64,
            preview_url,
            data: source.data.into(),
        });
        id
    }

    pub fn remove_attachment(&mut self, id: &str) -> bool {
        let before = self.pending_attachments.len();
        self.pending_attachments.retain(|a| a.id != id);
        self.pending_attachments.len() != before
    }

    pub fn clear_attachments(&mut self) {
        self.pending_attachments.clear();
    }

    /// Hand the pending attachments to an outgoing message
    pub fn take_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_attachments)
    }

    /// Start a new conversation: messages, streaming flag and pending
    /// attachments go together.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.is_streaming = false;
        self.pending_attachments.clear();
    }

    fn finish_streaming(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            if last.status == Some(MessageStatus::Streaming) {
                Arc::make_mut(last).status = Some(MessageStatus::Complete);
            }
        }
        self.is_streaming = false;
    }
}
