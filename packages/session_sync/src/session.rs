use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{
    CloseAction, ConnectionEvent, ConnectionManager, Dialer, LinkEvent, close_action,
};
use crate::error::SessionError;
use crate::projector::EnvironmentProjector;
use crate::protocol::{InboundFrame, classify_logged, encode_outbound};
use crate::reconciler::{ConversationLog, LogChange};
use crate::types::{
    ChatMessage, ConversationId, EnvironmentStatus, FileTrees, PreviewProjection,
};

/// What handling one connection event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A connection reached the ready state.
    Connected,
    /// The conversation log changed at the given position.
    Log(LogChange),
    /// A status frame was applied to the environment projections.
    Environment,
    /// The connection went away. `reopened` is true when a fresh connection
    /// was opened in its place.
    Closed {
        code: u16,
        reason: String,
        reopened: bool,
    },
    /// Nothing observable changed (stale epoch, dropped frame, transport error).
    Ignored,
}

/// One open conversation: its connection, its log and the projections of its
/// environment.
///
/// All mutation happens through `&mut self`, one event at a time.
pub struct Session<D: Dialer> {
    conversation: Option<ConversationId>,
    connection: ConnectionManager<D>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    log: ConversationLog,
    env: EnvironmentProjector,
    auto_reopens: u32,
}

impl<D: Dialer> Session<D> {
    /// Create a session. Nothing is dialed until [`Session::open`].
    ///
    /// `None` stands for a conversation the server has not created yet; the
    /// session stays in `NEW_CHAT` and refuses to send.
    pub fn new(dialer: D, conversation: Option<ConversationId>, config: ConnectionConfig) -> Self {
        let (connection, events) = ConnectionManager::new(dialer, config);
        Self {
            env: EnvironmentProjector::new(initial_status(conversation.as_ref())),
            conversation,
            connection,
            events,
            log: ConversationLog::new(),
            auto_reopens: 0,
        }
    }

    // ── snapshots ───────────────────────────────────────────────────────

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.entries()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn status(&self) -> EnvironmentStatus {
        self.env.status()
    }

    pub fn preview(&self) -> &PreviewProjection {
        self.env.preview()
    }

    pub fn file_trees(&self) -> &FileTrees {
        self.env.file_trees()
    }

    pub fn follow_ups(&self) -> &[String] {
        self.env.follow_ups()
    }

    pub fn git_log(&self) -> Option<&str> {
        self.env.git_log()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Initial connect. Same semantics as [`Session::reconnect`].
    pub async fn open(&mut self) {
        self.reconnect().await;
    }

    /// Replace the connection with a fresh one. Failures end up in
    /// [`Session::status`] as `DISCONNECTED`, never as an error.
    pub async fn reconnect(&mut self) {
        let Some(conversation) = self.conversation.clone() else {
            debug!("no conversation yet, nothing to connect");
            return;
        };

        self.env.set_status(EnvironmentStatus::Connecting);
        if let Err(e) = self.connection.open(&conversation).await {
            warn!(%conversation, error = %e, "could not connect");
            self.env.set_status(EnvironmentStatus::Disconnected);
        }
    }

    pub async fn disconnect(&mut self) {
        self.connection.close().await;
        self.env.set_status(EnvironmentStatus::Disconnected);
    }

    /// Tear down the current conversation and start over with `conversation`.
    pub async fn switch_conversation(&mut self, conversation: Option<ConversationId>) {
        self.connection.close().await;
        self.log.clear();
        self.env = EnvironmentProjector::new(initial_status(conversation.as_ref()));
        self.auto_reopens = 0;
        info!(
            conversation = conversation.as_ref().map(|c| c.as_str()).unwrap_or("<new>"),
            "switching conversation"
        );
        self.conversation = conversation;
        self.reconnect().await;
    }

    /// Replace the log with previously persisted history.
    pub fn seed_history(&mut self, messages: Vec<ChatMessage>) {
        self.log.seed(messages);
    }

    // ── outbound ────────────────────────────────────────────────────────

    /// Transmit a message. The reply arrives as frames; nothing is appended
    /// to the log here.
    pub async fn send(&mut self, message: ChatMessage) -> Result<(), SessionError> {
        if self.conversation.is_none() {
            return Err(SessionError::ConversationNotCreated);
        }
        if !self.connection.is_open() {
            return Err(SessionError::NotConnected);
        }

        let payload = encode_outbound(&message)?;
        self.env.set_status(EnvironmentStatus::Working);
        if let Err(e) = self.connection.send_text(payload).await {
            warn!(error = %e, "send failed");
            self.env.set_status(EnvironmentStatus::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    // ── inbound ─────────────────────────────────────────────────────────

    /// Wait for the next connection event.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Wait for the next event and apply it.
    pub async fn pump(&mut self) -> Option<SessionUpdate> {
        let event = self.next_event().await?;
        Some(self.handle_event(event).await)
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) -> SessionUpdate {
        if event.epoch != self.connection.epoch() {
            debug!(
                epoch = event.epoch,
                current = self.connection.epoch(),
                "dropping event from superseded connection"
            );
            return SessionUpdate::Ignored;
        }

        match event.event {
            LinkEvent::Ready => SessionUpdate::Connected,
            LinkEvent::Frame(raw) => {
                self.auto_reopens = 0;
                self.apply_frame(&raw)
            }
            LinkEvent::Error(e) => {
                warn!(epoch = event.epoch, error = %e, "connection error");
                SessionUpdate::Ignored
            }
            LinkEvent::Closed { code, reason } => {
                self.connection.release(event.epoch);
                self.on_closed(code, reason).await
            }
        }
    }

    /// Classify one raw frame and route it to the log or the projections.
    pub fn apply_frame(&mut self, raw: &str) -> SessionUpdate {
        match classify_logged(raw) {
            Some(InboundFrame::Status(frame)) => {
                self.env.apply_status(frame);
                SessionUpdate::Environment
            }
            Some(InboundFrame::ChatUpdate(frame)) => {
                self.env.apply_chat_update(&frame);
                SessionUpdate::Log(self.log.apply_update(frame.message))
            }
            Some(InboundFrame::ChatChunk(frame)) => SessionUpdate::Log(self.log.apply_chunk(frame)),
            None => SessionUpdate::Ignored,
        }
    }

    async fn on_closed(&mut self, code: u16, reason: String) -> SessionUpdate {
        let config = self.connection.config();
        let action = close_action(code, &config.retryable_close_codes);
        let cap = config.max_auto_reopens;

        match action {
            CloseAction::Reopen if self.auto_reopens < cap => {
                self.auto_reopens += 1;
                info!(code, %reason, attempt = self.auto_reopens, "reopening after close");
                self.reconnect().await;
                SessionUpdate::Closed {
                    code,
                    reason,
                    reopened: self.connection.is_open(),
                }
            }
            CloseAction::Reopen => {
                warn!(code, %reason, cap, "too many automatic reopens");
                self.env.set_status(EnvironmentStatus::Disconnected);
                SessionUpdate::Closed {
                    code,
                    reason,
                    reopened: false,
                }
            }
            CloseAction::Surface => {
                info!(code, %reason, "connection closed");
                self.env.set_status(EnvironmentStatus::Disconnected);
                SessionUpdate::Closed {
                    code,
                    reason,
                    reopened: false,
                }
            }
        }
    }
}

fn initial_status(conversation: Option<&ConversationId>) -> EnvironmentStatus {
    match conversation {
        Some(_) => EnvironmentStatus::Connecting,
        None => EnvironmentStatus::NewChat,
    }
}
