use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Server-side identifier of a conversation (a "chat").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for ConversationId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a persisted message.
///
/// The server stores integer primary keys; other deployments hand out string
/// ids. Both are accepted and compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::Text(s.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Present for server-persisted messages, absent for streamed partials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: content.into(),
            thinking_content: None,
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(content)
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach already-uploaded image URLs.
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = if images.is_empty() { None } else { Some(images) };
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Overall state of the remote build environment as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentStatus {
    NewChat,
    Disconnected,
    Offline,
    Building,
    BuildingWaiting,
    Ready,
    Working,
    WorkingApplying,
    Connecting,
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::NewChat => "NEW_CHAT",
            EnvironmentStatus::Disconnected => "DISCONNECTED",
            EnvironmentStatus::Offline => "OFFLINE",
            EnvironmentStatus::Building => "BUILDING",
            EnvironmentStatus::BuildingWaiting => "BUILDING_WAITING",
            EnvironmentStatus::Ready => "READY",
            EnvironmentStatus::Working => "WORKING",
            EnvironmentStatus::WorkingApplying => "WORKING_APPLYING",
            EnvironmentStatus::Connecting => "CONNECTING",
        }
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EnvironmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NEW_CHAT" => EnvironmentStatus::NewChat,
            "DISCONNECTED" => EnvironmentStatus::Disconnected,
            "OFFLINE" => EnvironmentStatus::Offline,
            "BUILDING" => EnvironmentStatus::Building,
            "BUILDING_WAITING" => EnvironmentStatus::BuildingWaiting,
            "READY" => EnvironmentStatus::Ready,
            "WORKING" => EnvironmentStatus::Working,
            "WORKING_APPLYING" => EnvironmentStatus::WorkingApplying,
            "CONNECTING" => EnvironmentStatus::Connecting,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

/// Where the live preview of the project points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewProjection {
    pub url: Option<String>,
    pub path: String,
    /// Bumped on every chat update so consumers can force a reload.
    pub revision: u64,
}

impl Default for PreviewProjection {
    fn default() -> Self {
        Self {
            url: None,
            path: "/".to_string(),
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub kind: FileNodeKind,
    /// Number of path segments above this node (`src/main.rs` has depth 1).
    pub depth: usize,
}

/// A sandbox file listing keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTree {
    nodes: BTreeMap<String, FileNode>,
}

impl FileTree {
    /// Build a tree from a flat list of file paths, adding implied directories.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut nodes = BTreeMap::new();
        for raw in paths {
            let path = raw.as_ref().trim_matches('/');
            if path.is_empty() {
                continue;
            }
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            for depth in 0..segments.len().saturating_sub(1) {
                let dir = segments[..=depth].join("/");
                nodes.entry(dir).or_insert(FileNode {
                    kind: FileNodeKind::Directory,
                    depth,
                });
            }
            // A listed path wins over an implied directory of the same name.
            nodes.insert(
                segments.join("/"),
                FileNode {
                    kind: FileNodeKind::File,
                    depth: segments.len() - 1,
                },
            );
        }
        Self { nodes }
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileNode)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, node)| node.kind == FileNodeKind::File)
            .map(|(path, _)| path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The backend and frontend sandbox listings, replaced independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTrees {
    pub backend: FileTree,
    pub frontend: FileTree,
}
