//! Read-side view of group membership used by the hub and the agents.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("group '{0}' not found")]
    GroupNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Maps users to the groups they belong to and group keys to row ids.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Keys of every group `user_id` belongs to.
    ///
    /// Fails with [`DirectoryError::UserNotFound`] for unknown users.
    async fn groups_for_user(&self, user_id: i64) -> DirectoryResult<Vec<String>>;

    /// Numeric id of the group addressed by `group_key`.
    async fn resolve_group(&self, group_key: &str) -> DirectoryResult<i64>;
}

/// Postgres-backed [`GroupDirectory`].
#[derive(Clone, Debug)]
pub struct PgGroupDirectory {
    pool: PgPool,
}

impl PgGroupDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupDirectory for PgGroupDirectory {
    #[instrument(name = "directory.groups_for_user", skip(self), err)]
    async fn groups_for_user(&self, user_id: i64) -> DirectoryResult<Vec<String>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(DirectoryError::UserNotFound(user_id));
        }

        let keys: Vec<String> = sqlx::query_scalar(
            r"SELECT g.key FROM groups g
              JOIN group_members m ON m.group_id = g.id
              WHERE m.user_id = $1
              ORDER BY g.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    #[instrument(name = "directory.resolve_group", skip(self), err)]
    async fn resolve_group(&self, group_key: &str) -> DirectoryResult<i64> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM groups WHERE key = $1")
            .bind(group_key)
            .fetch_optional(&self.pool)
            .await?;
        id.ok_or_else(|| DirectoryError::GroupNotFound(group_key.to_string()))
    }
}
