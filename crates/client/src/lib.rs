//! Client core for the requirements analyst assistant.
//!
//! A persistent WebSocket connection to the analyst server feeds a single
//! event loop that owns the chat, artifact and project stores. Local edits
//! are applied optimistically and saved after a debounce window.

pub mod actor;
pub mod artifacts;
pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod paths;
pub mod preferences;
pub mod project;
pub mod router;
pub mod saves;
pub mod socket;
pub mod storage;

pub use actor::{ClientCommand, ClientHandle, Timings};
pub use artifacts::{ArtifactStore, OpenOutcome, UiArtifact};
pub use chat::{Attachment, AttachmentSource, ChatStore, Message, MessageStatus};
pub use config::{Cli, ClientConfig, ConfigError};
pub use error::ClientError;
pub use identity::{Location, SessionIdentity};
pub use preferences::{LayoutMode, Preferences, UiPreferences};
pub use project::ProjectStore;
pub use router::{route, ClientState, Effect};
pub use saves::{Outbound, SavePipeline};
pub use socket::{ConnectionPhase, ReconnectPolicy, SocketClient, Subscription};
pub use storage::{KvStore, StorageError};
