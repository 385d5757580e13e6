//! Wire Protocol Types
//!
//! Frames pushed by the server over the conversation WebSocket, and the
//! classifier that turns a raw text frame into one of them.

use serde::Deserialize;
use serde::de::{Deserializer, MapAccess, Visitor};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::types::ChatMessage;

/// Frames sent FROM the server TO the client, tagged by `for_type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "for_type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Sandbox environment snapshot
    Status(StatusFrame),
    /// A complete message, usually persisted and carrying an id
    ChatUpdate(ChatUpdateFrame),
    /// A token delta of the assistant reply in progress
    ChatChunk(ChatChunkFrame),
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Status(_) => "status",
            InboundFrame::ChatUpdate(_) => "chat_update",
            InboundFrame::ChatChunk(_) => "chat_chunk",
        }
    }
}

/// Every field is optional; `null` means the same as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusFrame {
    #[serde(default)]
    pub frontend_tunnel: Option<String>,
    /// Named tunnels in wire order.
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub tunnels: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub backend_file_paths: Option<Vec<String>>,
    #[serde(default)]
    pub frontend_file_paths: Option<Vec<String>>,
    /// Per-service sandbox status strings in wire order.
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub sandbox_statuses: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub git_log: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatUpdateFrame {
    pub message: ChatMessage,
    #[serde(default)]
    pub follow_ups: Option<Vec<String>>,
    #[serde(default)]
    pub navigate_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunkFrame {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking_content: Option<String>,
}

/// Result of classifying one raw frame.
#[derive(Debug)]
pub enum Classified {
    Frame(InboundFrame),
    /// A tag-less `{"error": "..."}` notice from the server.
    Notice(String),
    /// A frame with a discriminant this client does not know (or none at all).
    Unknown(Option<String>),
    Malformed(SessionError),
}

const KNOWN_KINDS: [&str; 3] = ["status", "chat_update", "chat_chunk"];

/// Just enough of a frame to route it.
#[derive(Deserialize)]
struct Probe {
    #[serde(default)]
    for_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Classify a raw text frame.
///
/// The frame is parsed twice: once to read the discriminant, once into the
/// typed frame. Going through `serde_json::Value` would reorder map keys.
pub fn classify(raw: &str) -> Classified {
    let probe: Probe = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => return Classified::Malformed(SessionError::MalformedFrame(e)),
    };

    match probe.for_type.as_deref() {
        Some(kind) if KNOWN_KINDS.contains(&kind) => match serde_json::from_str(raw) {
            Ok(frame) => Classified::Frame(frame),
            Err(e) => Classified::Malformed(SessionError::MalformedFrame(e)),
        },
        Some(kind) => Classified::Unknown(Some(kind.to_string())),
        None => match probe.error {
            Some(message) => Classified::Notice(message),
            None => Classified::Unknown(None),
        },
    }
}

/// Classify and log whatever gets dropped. Returns only routable frames.
pub fn classify_logged(raw: &str) -> Option<InboundFrame> {
    match classify(raw) {
        Classified::Frame(frame) => Some(frame),
        Classified::Notice(message) => {
            warn!(%message, "server notice");
            None
        }
        Classified::Unknown(kind) => {
            debug!(kind = ?kind, "dropping frame of unknown kind");
            None
        }
        Classified::Malformed(e) => {
            warn!(error = %e, len = raw.len(), "dropping malformed frame");
            None
        }
    }
}

/// Encode an outbound user message.
pub fn encode_outbound(message: &ChatMessage) -> Result<String, SessionError> {
    serde_json::to_string(message).map_err(SessionError::Encode)
}

/// Deserialize an optional JSON object into key/value pairs, keeping wire order.
fn ordered_pairs<'de, D, T>(deserializer: D) -> Result<Option<Vec<(String, T)>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct Pairs<T>(Vec<(String, T)>);

    impl<'de, T: Deserialize<'de>> Deserialize<'de> for Pairs<T> {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct PairsVisitor<T>(PhantomData<T>);

            impl<'de, T: Deserialize<'de>> Visitor<'de> for PairsVisitor<T> {
                type Value = Pairs<T>;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("a map")
                }

                fn visit_map<A: MapAccess<'de>>(
                    self,
                    mut map: A,
                ) -> Result<Self::Value, A::Error> {
                    let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                    while let Some((key, value)) = map.next_entry::<String, T>()? {
                        pairs.push((key, value));
                    }
                    Ok(Pairs(pairs))
                }
            }

            deserializer.deserialize_map(PairsVisitor(PhantomData))
        }
    }

    Ok(Option::<Pairs<T>>::deserialize(deserializer)?.map(|p| p.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageId, Role};

    fn frame(raw: &str) -> InboundFrame {
        match classify(raw) {
            Classified::Frame(f) => f,
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    // ── status ──────────────────────────────────────────────────────────

    #[test]
    fn test_status_frame_full() {
        let raw = r#"{
            "for_type": "status",
            "project_id": 7,
            "sandbox_statuses": {"12": "READY", "11": "BUILDING"},
            "tunnels": {"12": "https://fe.example"},
            "backend_file_paths": ["app/main.py"],
            "frontend_file_paths": null,
            "git_log": "abc123 init",
            "frontend_tunnel": "https://preview.example"
        }"#;
        let InboundFrame::Status(status) = frame(raw) else {
            panic!("Expected Status frame");
        };
        assert_eq!(
            status.sandbox_statuses,
            Some(vec![
                ("12".to_string(), "READY".to_string()),
                ("11".to_string(), "BUILDING".to_string()),
            ])
        );
        assert_eq!(status.frontend_tunnel.as_deref(), Some("https://preview.example"));
        assert_eq!(status.backend_file_paths, Some(vec!["app/main.py".to_string()]));
        assert!(status.frontend_file_paths.is_none());
        assert_eq!(status.git_log.as_deref(), Some("abc123 init"));
    }

    #[test]
    fn test_status_frame_keeps_tunnel_wire_order() {
        let raw = r#"{"for_type":"status","tunnels":{"b":"url-b","a":"url-a"}}"#;
        let InboundFrame::Status(status) = frame(raw) else {
            panic!("Expected Status frame");
        };
        let tunnels = status.tunnels.unwrap();
        assert_eq!(tunnels[0], ("b".to_string(), "url-b".to_string()));
        assert_eq!(tunnels[1], ("a".to_string(), "url-a".to_string()));
    }

    #[test]
    fn test_status_frame_null_mappings_are_absent() {
        let raw = r#"{"for_type":"status","tunnels":null,"sandbox_statuses":null}"#;
        let InboundFrame::Status(status) = frame(raw) else {
            panic!("Expected Status frame");
        };
        assert!(status.tunnels.is_none());
        assert!(status.sandbox_statuses.is_none());
    }

    #[test]
    fn test_status_frame_minimal() {
        let InboundFrame::Status(status) = frame(r#"{"for_type":"status"}"#) else {
            panic!("Expected Status frame");
        };
        assert_eq!(status, StatusFrame::default());
    }

    // ── chat_update / chat_chunk ────────────────────────────────────────

    #[test]
    fn test_chat_update_frame() {
        let raw = r#"{
            "for_type": "chat_update",
            "chat_id": 3,
            "message": {"id": 99, "role": "assistant", "content": "Done", "images": null},
            "follow_ups": ["Add tests", "Deploy"],
            "navigate_to": "/dashboard"
        }"#;
        let InboundFrame::ChatUpdate(update) = frame(raw) else {
            panic!("Expected ChatUpdate frame");
        };
        assert_eq!(update.message.id, Some(MessageId::Number(99)));
        assert_eq!(update.message.role, Role::Assistant);
        assert_eq!(update.follow_ups.as_ref().map(|f| f.len()), Some(2));
        assert_eq!(update.navigate_to.as_deref(), Some("/dashboard"));
    }

    #[test]
    fn test_chat_chunk_frame() {
        let raw = r#"{"for_type":"chat_chunk","role":"assistant","content":"He","thinking_content":""}"#;
        let InboundFrame::ChatChunk(chunk) = frame(raw) else {
            panic!("Expected ChatChunk frame");
        };
        assert_eq!(chunk.content, "He");
        assert_eq!(chunk.thinking_content.as_deref(), Some(""));
    }

    #[test]
    fn test_chat_chunk_without_thinking() {
        let InboundFrame::ChatChunk(chunk) = frame(r#"{"for_type":"chat_chunk","content":"x"}"#)
        else {
            panic!("Expected ChatChunk frame");
        };
        assert!(chunk.thinking_content.is_none());
    }

    // ── dropped frames ──────────────────────────────────────────────────

    #[test]
    fn test_unknown_kind() {
        match classify(r#"{"for_type":"deploy_progress","pct":40}"#) {
            Classified::Unknown(Some(kind)) => assert_eq!(kind, "deploy_progress"),
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_discriminant() {
        assert!(matches!(
            classify(r#"{"message":"hi"}"#),
            Classified::Unknown(None)
        ));
    }

    #[test]
    fn test_error_notice() {
        match classify(r#"{"error":"Backend sandbox is not running."}"#) {
            Classified::Notice(message) => assert_eq!(message, "Backend sandbox is not running."),
            other => panic!("Expected Notice, got {:?}", other),
        }
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(
            classify("not json at all"),
            Classified::Malformed(SessionError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_known_kind_with_bad_body_is_malformed() {
        // chat_update without a message
        assert!(matches!(
            classify(r#"{"for_type":"chat_update"}"#),
            Classified::Malformed(_)
        ));
        // tunnels must be an object
        assert!(matches!(
            classify(r#"{"for_type":"status","tunnels":["a"]}"#),
            Classified::Malformed(_)
        ));
    }

    #[test]
    fn test_classify_logged_filters() {
        assert!(classify_logged("{").is_none());
        assert!(classify_logged(r#"{"for_type":"nope"}"#).is_none());
        assert!(classify_logged(r#"{"for_type":"chat_chunk","content":"a"}"#).is_some());
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[test]
    fn test_encode_outbound() {
        let msg = ChatMessage::user("make it blue").with_images(vec!["https://i/1.png".into()]);
        let json: serde_json::Value = serde_json::from_str(&encode_outbound(&msg).unwrap()).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "make it blue");
        assert_eq!(json["images"][0], "https://i/1.png");
        assert!(json.get("id").is_none());
    }
}
