use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors raised by the connection and session layers.
///
/// Only `send` returns these to a caller. Connection failures during
/// `open`/`reconnect` are folded into [`EnvironmentStatus::Disconnected`]
/// instead.
///
/// [`EnvironmentStatus::Disconnected`]: crate::EnvironmentStatus::Disconnected
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The socket did not become ready within the configured bound.
    #[error("connection was not ready within {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection closed with code {code}: {reason}")]
    TransportClosed { code: u16, reason: String },

    /// An inbound frame could not be parsed. Dropped, never fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("send failed: no open connection")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailure(#[source] tungstenite::Error),

    /// The conversation does not exist on the server yet; creating it is the
    /// caller's job.
    #[error("conversation has not been created yet")]
    ConversationNotCreated,

    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to dial: {0}")]
    Dial(String),
}

/// Errors from the conversation HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Request(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }
}
