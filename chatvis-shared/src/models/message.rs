use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as it travels over the WebSocket and through the hub.
///
/// `group_id` is the group's public key, not its numeric row id. `id` is `None` until the
/// message has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub sender_id: i64,
    pub group_id: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answer_id: Option<i64>,
}

impl ChatMessage {
    /// Build an unpersisted message.
    #[must_use]
    pub fn new(sender_id: i64, group_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id,
            group_id: group_id.into(),
            content: content.into(),
            created_at: None,
            answer_id: None,
        }
    }
}

/// A message row as held by the message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub answer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Project the stored row onto the wire shape, addressed by `group_key`.
    #[must_use]
    pub fn to_chat_message(&self, group_key: &str) -> ChatMessage {
        ChatMessage {
            id: Some(self.id),
            sender_id: self.sender_id,
            group_id: group_key.to_string(),
            content: self.content.clone(),
            created_at: Some(self.created_at),
            answer_id: self.answer_id,
        }
    }
}

/// Insert payload for the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub group_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub answer_id: Option<i64>,
}

/// Last message id an agent has incorporated for one group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCheckpoint {
    pub agent_id: i64,
    pub group_id: i64,
    pub last_seen_message_id: i64,
}

/// `POST /api/messages`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub group_id: String,
    pub content: String,
    #[serde(default)]
    pub answer_id: Option<i64>,
}

/// `PUT /api/messages/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateMessageRequest {
    pub content: String,
}
