//! Conversation HTTP API.
//!
//! The WebSocket only carries live traffic. History and conversation creation
//! go through two REST endpoints:
//!
//! - `GET  /api/chats/{id}`: the persisted record, messages included
//! - `POST /api/chats`: create a conversation from a seed prompt

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::SessionSyncConfig;
use crate::error::ApiError;
use crate::types::{ChatMessage, ConversationId, MessageId};

/// Server-side identifier of the project a conversation builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectRef {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: ProjectId,
}

/// A persisted conversation as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationRecord {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
}

/// Request body for creating a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub team_id: i64,
    pub seed_prompt: String,
}

impl NewConversation {
    pub fn new(team_id: i64, seed_prompt: impl Into<String>) -> Self {
        Self {
            name: None,
            stack_id: None,
            project_id: None,
            team_id,
            seed_prompt: seed_prompt.into(),
        }
    }
}

/// Thin reqwest client for the conversation endpoints.
#[derive(Debug, Clone)]
pub struct ChatApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl ChatApi {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(config: &SessionSyncConfig) -> Self {
        Self::new(config.api_url.clone(), config.token.clone())
    }

    pub fn chat_url(&self, conversation: &ConversationId) -> String {
        format!("{}/api/chats/{}", self.api_url, conversation)
    }

    pub async fn fetch_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationRecord, ApiError> {
        let url = self.chat_url(conversation);
        debug!(%url, "fetching conversation");
        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        read_record(resp).await
    }

    pub async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> Result<ConversationRecord, ApiError> {
        let url = format!("{}/api/chats", self.api_url);
        debug!(%url, team_id = request.team_id, "creating conversation");
        let resp = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        read_record(resp).await
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn read_record(resp: reqwest::Response) -> Result<ConversationRecord, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    resp.json().await.map_err(ApiError::from_reqwest)
}

/// Server ids are integers; accept strings too.
fn id_from_number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    Ok(match MessageId::deserialize(deserializer)? {
        MessageId::Number(n) => T::from(n.to_string()),
        MessageId::Text(s) => T::from(s),
    })
}
