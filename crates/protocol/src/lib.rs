//! AI Business Analyst Protocol
//!
//! Shared types for communication between the analyst server and clients.
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}` sent over
//! a WebSocket.

use uuid::Uuid;

pub mod client;
pub mod documents;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use documents::{
    ContentError, StructuredDocument, UseCaseData, UserStoryData, WorkbookData,
};
pub use server::{DecodeError, Envelope, ServerMessage};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
