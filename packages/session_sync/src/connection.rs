//! Connection Manager
//!
//! Owns the single WebSocket of a session. Every connection gets an epoch;
//! the reader task tags each event with it so the session can tell frames of
//! the live connection from leftovers of a superseded one.
//!
//! ```text
//!   open() ──▶ dial (bounded by connect_timeout) ──▶ Ready
//!                                                   │
//!              reader task ──▶ Frame(..)* ──▶ Closed { code, reason }
//! ```

use std::future::Future;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, SessionSyncConfig};
use crate::error::SessionError;
use crate::types::ConversationId;

/// Close frame without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Stream ended without any close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Opens the transport for a conversation. The production implementation is
/// [`WsDialer`]; tests dial in-memory pipes.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<WebSocketStream<Self::Stream>, SessionError>> + Send;
}

/// Dials `{ws_url}/api/ws/chat/{id}?token=..`.
#[derive(Debug, Clone)]
pub struct WsDialer {
    ws_url: String,
    token: Option<String>,
}

impl WsDialer {
    pub fn new(ws_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(config: &SessionSyncConfig) -> Self {
        Self::new(config.ws_url.clone(), config.token.clone())
    }

    pub fn chat_url(&self, conversation: &ConversationId) -> Result<reqwest::Url, SessionError> {
        let mut url = reqwest::Url::parse(&format!(
            "{}/api/ws/chat/{}",
            self.ws_url, conversation
        ))
        .map_err(|e| SessionError::Dial(format!("invalid websocket url: {e}")))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

impl Dialer for WsDialer {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn dial(
        &self,
        conversation: &ConversationId,
    ) -> Result<WebSocketStream<Self::Stream>, SessionError> {
        let url = self.chat_url(conversation)?;
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(ws)
    }
}

/// Raw lifecycle events of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Ready,
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub epoch: u64,
    pub event: LinkEvent,
}

/// What to do after the server closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Transient protocol trouble: open a fresh connection right away.
    Reopen,
    /// Report `DISCONNECTED` and wait for the user.
    Surface,
}

pub fn close_action(code: u16, retryable: &[u16]) -> CloseAction {
    if retryable.contains(&code) {
        CloseAction::Reopen
    } else {
        CloseAction::Surface
    }
}

struct LiveLink<S> {
    epoch: u64,
    sink: SplitSink<WebSocketStream<S>, Message>,
    cancel: CancellationToken,
}

/// Holds at most one live connection and the queue its events land in.
pub struct ConnectionManager<D: Dialer> {
    dialer: D,
    config: ConnectionConfig,
    live: Option<LiveLink<D::Stream>>,
    epoch: u64,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl<D: Dialer> ConnectionManager<D> {
    /// Create a manager and the receiving end of its event queue.
    pub fn new(
        dialer: D,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            dialer,
            config,
            live: None,
            epoch: 0,
            events_tx,
        };
        (manager, events_rx)
    }

    /// Epoch of the current connection. Events with any other epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replace any existing connection with a new one for `conversation`.
    ///
    /// Returns the epoch of the new connection. `Ready` is queued before any
    /// frame of it.
    pub async fn open(&mut self, conversation: &ConversationId) -> Result<u64, SessionError> {
        self.close().await;
        self.epoch += 1;
        let epoch = self.epoch;
        let bound = self.config.connect_timeout;

        let ws = match tokio::time::timeout(bound, self.dialer.dial(conversation)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!(%conversation, epoch, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                warn!(%conversation, epoch, timeout = ?bound, "connect timed out");
                return Err(SessionError::ConnectTimeout(bound));
            }
        };

        let (sink, stream) = ws.split();
        let cancel = CancellationToken::new();
        let _ = self.events_tx.send(ConnectionEvent {
            epoch,
            event: LinkEvent::Ready,
        });
        tokio::spawn(read_loop(
            stream,
            epoch,
            cancel.clone(),
            self.events_tx.clone(),
        ));
        self.live = Some(LiveLink {
            epoch,
            sink,
            cancel,
        });

        info!(%conversation, epoch, "connection ready");
        Ok(epoch)
    }

    /// Close the live connection, if any. Safe to call repeatedly.
    ///
    /// Events already queued for the closed connection become stale.
    pub async fn close(&mut self) {
        let Some(mut link) = self.live.take() else {
            return;
        };
        link.cancel.cancel();
        self.epoch += 1;

        let goodbye = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::from("client closing").into(),
        }));
        // The peer may already be gone; don't wait on it.
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            link.sink.send(goodbye),
        )
        .await;
        debug!(epoch = link.epoch, "connection closed");
    }

    /// Forget a connection the server already closed.
    pub fn release(&mut self, epoch: u64) {
        if self.live.as_ref().is_some_and(|l| l.epoch == epoch) {
            if let Some(link) = self.live.take() {
                link.cancel.cancel();
            }
        }
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        let link = self.live.as_mut().ok_or(SessionError::NotConnected)?;
        link.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(SessionError::SendFailure)
    }
}

impl<D: Dialer> Drop for ConnectionManager<D> {
    fn drop(&mut self) {
        if let Some(link) = &self.live {
            link.cancel.cancel();
        }
    }
}

/// Forward socket events into the session queue until closed or cancelled.
async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    epoch: u64,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let emit = |event: LinkEvent| tx.send(ConnectionEvent { epoch, event }).is_ok();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        let event = match next {
            Some(Ok(Message::Text(text))) => LinkEvent::Frame(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => LinkEvent::Frame(text),
                Err(_) => {
                    debug!(epoch, "dropping non-utf8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                debug!(epoch, code, %reason, "server closed connection");
                emit(LinkEvent::Closed { code, reason });
                break;
            }
            // ping/pong are answered by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                let reason = e.to_string();
                emit(LinkEvent::Error(reason.clone()));
                emit(LinkEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason,
                });
                break;
            }
            None => {
                emit(LinkEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "stream ended".to_string(),
                });
                break;
            }
        };

        if !emit(event) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_action_retryable_codes() {
        let retryable = [1002, 1003];
        assert_eq!(close_action(1002, &retryable), CloseAction::Reopen);
        assert_eq!(close_action(1003, &retryable), CloseAction::Reopen);
        assert_eq!(close_action(1000, &retryable), CloseAction::Surface);
        assert_eq!(close_action(1008, &retryable), CloseAction::Surface);
        assert_eq!(close_action(CLOSE_ABNORMAL, &retryable), CloseAction::Surface);
        assert_eq!(close_action(1002, &[]), CloseAction::Surface);
    }

    #[test]
    fn test_chat_url_without_token() {
        let dialer = WsDialer::new("ws://127.0.0.1:8000/", None);
        let url = dialer.chat_url(&ConversationId::from(42)).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/api/ws/chat/42");
    }

    #[test]
    fn test_chat_url_encodes_token() {
        let dialer = WsDialer::new("wss://api.example.com", Some("a b&c".into()));
        let url = dialer.chat_url(&ConversationId::from("7")).unwrap();
        assert_eq!(url.path(), "/api/ws/chat/7");
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_chat_url_rejects_garbage() {
        let dialer = WsDialer::new("not a url", None);
        assert!(matches!(
            dialer.chat_url(&ConversationId::from("1")),
            Err(SessionError::Dial(_))
        ));
    }

    #[tokio::test]
    async fn test_wss_dial_reaches_tls_handshake() {
        // a peer that hangs up before any TLS bytes are exchanged
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let dialer = WsDialer::new(format!("wss://127.0.0.1:{port}"), Some("t".into()));
        let err = match dialer.dial(&ConversationId::from("1")).await {
            Ok(_) => panic!("Expected the handshake to fail"),
            Err(e) => e,
        };
        assert!(
            !matches!(
                err,
                SessionError::WebSocket(tokio_tungstenite::tungstenite::Error::Url(_))
            ),
            "wss url rejected before connecting: {err}"
        );
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let (mut manager, _rx) =
            ConnectionManager::new(WsDialer::new("ws://127.0.0.1:1", None), ConnectionConfig::default());
        manager.close().await;
        manager.close().await;
        assert!(!manager.is_open());
        assert_eq!(manager.epoch(), 0);
        assert!(matches!(
            manager.send_text("x".into()).await,
            Err(SessionError::NotConnected)
        ));
    }
}
