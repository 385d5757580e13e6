//! # Session Sync
//!
//! Client-side synchronization engine for a conversational build assistant.
//!
//! A user chats with an assistant that builds and runs a project inside a
//! remote sandbox. The server pushes three kinds of frames over one WebSocket
//! per conversation:
//!
//! - `status` frames describing the sandbox (service statuses, tunnels, file trees)
//! - `chat_update` frames carrying a complete, usually persisted, message
//! - `chat_chunk` frames carrying token deltas of an in-progress reply
//!
//! This crate turns that stream into an ordered [`ConversationLog`] and a set
//! of environment projections, while surviving reconnects, duplicate
//! deliveries and abnormal closures.
//!
//! ## Layers
//!
//! ```text
//! ConnectionManager ──▶ classify() ──▶ ConversationLog      ──▶ Session (snapshots)
//!   (one socket,          (protocol)    (reconciler)
//!    epoch-tagged events)           └─▶ EnvironmentProjector
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_sync::{ChatMessage, ConnectionConfig, ConversationId, Session, WsDialer};
//!
//! # async fn run() -> Result<(), session_sync::SessionError> {
//! let dialer = WsDialer::new("ws://127.0.0.1:8000", None);
//! let mut session = Session::new(
//!     dialer,
//!     Some(ConversationId::from("42")),
//!     ConnectionConfig::default(),
//! );
//!
//! session.open().await;
//! session.send(ChatMessage::user("Add a login page")).await?;
//!
//! while session.pump().await.is_some() {
//!     println!("{}: {} messages", session.status(), session.messages().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod projector;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod types;

pub use api::{ChatApi, ConversationRecord, NewConversation, ProjectId, ProjectRef};
pub use config::{ConnectionConfig, FileConfig, SessionSyncConfig, load_config};
pub use connection::{
    CloseAction, ConnectionEvent, ConnectionManager, Dialer, LinkEvent, WsDialer, close_action,
};
pub use error::{ApiError, SessionError};
pub use projector::EnvironmentProjector;
pub use protocol::{
    ChatChunkFrame, ChatUpdateFrame, Classified, InboundFrame, StatusFrame, classify,
};
pub use reconciler::{ConversationLog, LogChange};
pub use session::{Session, SessionUpdate};
pub use types::{
    ChatMessage, ConversationId, EnvironmentStatus, FileNode, FileNodeKind, FileTree, FileTrees,
    MessageId, PreviewProjection, Role,
};
