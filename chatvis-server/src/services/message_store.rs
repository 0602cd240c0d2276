//! Message persistence and per-agent checkpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{NewMessage, StoredMessage};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage contract used by the dispatch core and the WebSocket session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages of `group_id` with id greater than `after`, oldest first. Includes
    /// messages authored by `agent_id` so they can be replayed as its own turns.
    async fn fetch_unseen(
        &self,
        agent_id: i64,
        group_id: i64,
        after: i64,
    ) -> StoreResult<Vec<StoredMessage>>;

    /// Persist a message and return it with its assigned id and timestamp. An
    /// `answer_id` that does not name a message of the same group is stored as absent.
    async fn append(&self, message: NewMessage) -> StoreResult<StoredMessage>;

    /// Current checkpoint for the pair, creating it at zero on first use.
    async fn checkpoint(&self, agent_id: i64, group_id: i64) -> StoreResult<i64>;

    /// Move the checkpoint forward to `message_id`. Never moves it backwards.
    async fn set_checkpoint(&self, agent_id: i64, group_id: i64, message_id: i64)
    -> StoreResult<()>;
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    group_id: i64,
    sender_id: i64,
    content: String,
    answer_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            group_id: row.group_id,
            sender_id: row.sender_id,
            content: row.content,
            answer_id: row.answer_id,
            created_at: row.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, group_id, sender_id, content, answer_id, created_at";

/// Postgres-backed [`MessageStore`].
#[derive(Clone, Debug)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Full history of a group, oldest first.
    #[instrument(name = "messages.list_by_group", skip(self), err)]
    pub async fn list_by_group(&self, group_id: i64) -> StoreResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE group_id = $1 ORDER BY id ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }

    #[instrument(name = "messages.get", skip(self), err)]
    pub async fn get(&self, message_id: i64) -> StoreResult<StoredMessage> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredMessage::from)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))
    }

    /// Replace the content of a message written by `sender_id`.
    #[instrument(name = "messages.update_content", skip(self, content), err)]
    pub async fn update_content(
        &self,
        message_id: i64,
        sender_id: i64,
        content: &str,
    ) -> StoreResult<StoredMessage> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "UPDATE messages SET content = $3 WHERE id = $1 AND sender_id = $2 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message_id)
        .bind(sender_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredMessage::from).ok_or_else(|| {
            StoreError::NotFound(format!("message {message_id} by user {sender_id}"))
        })
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[instrument(name = "messages.fetch_unseen", skip(self), err)]
    async fn fetch_unseen(
        &self,
        agent_id: i64,
        group_id: i64,
        after: i64,
    ) -> StoreResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE group_id = $1 AND id > $2 ORDER BY id ASC"
        ))
        .bind(group_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        debug!(agent_id, unseen = rows.len(), "fetched unseen window");
        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }

    #[instrument(name = "messages.append", skip(self, message), fields(group_id = message.group_id, sender_id = message.sender_id), err)]
    async fn append(&self, message: NewMessage) -> StoreResult<StoredMessage> {
        let row: MessageRow = sqlx::query_as(&format!(
            r"INSERT INTO messages (group_id, sender_id, content, answer_id)
              VALUES ($1, $2, $3, (SELECT id FROM messages WHERE id = $4 AND group_id = $1))
              RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.group_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.answer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    #[instrument(name = "checkpoints.get", skip(self), err)]
    async fn checkpoint(&self, agent_id: i64, group_id: i64) -> StoreResult<i64> {
        sqlx::query(
            r"INSERT INTO agent_checkpoints (agent_id, group_id, last_seen_message_id)
              VALUES ($1, $2, 0)
              ON CONFLICT (agent_id, group_id) DO NOTHING",
        )
        .bind(agent_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        let value: i64 = sqlx::query_scalar(
            "SELECT last_seen_message_id FROM agent_checkpoints WHERE agent_id = $1 AND group_id = $2",
        )
        .bind(agent_id)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    #[instrument(name = "checkpoints.set", skip(self), err)]
    async fn set_checkpoint(
        &self,
        agent_id: i64,
        group_id: i64,
        message_id: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r"INSERT INTO agent_checkpoints (agent_id, group_id, last_seen_message_id, updated_at)
              VALUES ($1, $2, $3, NOW())
              ON CONFLICT (agent_id, group_id) DO UPDATE
              SET last_seen_message_id = GREATEST(agent_checkpoints.last_seen_message_id, EXCLUDED.last_seen_message_id),
                  updated_at = NOW()",
        )
        .bind(agent_id)
        .bind(group_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
