//! Group CRUD for the HTTP API.

use chrono::{DateTime, Utc};
use shared::models::{Group, User};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::errors::{ServiceError, ServiceResult};

const MAX_GROUP_NAME_LEN: usize = 120;
const GROUP_COLUMNS: &str = "g.id, g.key, g.name, g.created_by, g.created_at";

#[derive(Debug, FromRow)]
struct GroupRow {
    id: i64,
    key: String,
    name: String,
    created_by: i64,
    created_at: DateTime<Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id,
            key: row.key,
            name: row.name,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    id: i64,
    name: String,
    nickname: Option<String>,
    email: String,
    is_llm: bool,
    created_at: DateTime<Utc>,
}

impl From<MemberRow> for User {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            nickname: row.nickname,
            email: row.email,
            is_llm: row.is_llm,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupService {
    pool: PgPool,
}

impl GroupService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a group with a fresh key; the creator becomes its first member.
    #[instrument(name = "groups.create", skip(self), err)]
    pub async fn create(&self, creator: i64, name: &str) -> ServiceResult<Group> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(ServiceError::Validation(format!(
                "group name must be between 1 and {MAX_GROUP_NAME_LEN} characters"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let row: GroupRow = sqlx::query_as(
            r"INSERT INTO groups (key, name, created_by) VALUES ($1, $2, $3)
              RETURNING id, key, name, created_by, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(creator)
        .fetch_one(&mut *tx)
        .await
        .map_err(ServiceError::from_db_error)?;

        sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1, $2)")
            .bind(row.id)
            .bind(creator)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::from_db_error)?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(name = "groups.for_member", skip(self), err)]
    pub async fn for_member(&self, user_id: i64) -> ServiceResult<Vec<Group>> {
        let rows: Vec<GroupRow> = sqlx::query_as(&format!(
            r"SELECT {GROUP_COLUMNS} FROM groups g
              JOIN group_members m ON m.group_id = g.id
              WHERE m.user_id = $1
              ORDER BY g.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Group::from).collect())
    }

    #[instrument(name = "groups.get_by_key", skip(self), err)]
    pub async fn get_by_key(&self, key: &str) -> ServiceResult<Group> {
        let row: Option<GroupRow> =
            sqlx::query_as(&format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.key = $1"))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Group::from)
            .ok_or_else(|| ServiceError::NotFound(format!("group {key}")))
    }

    #[instrument(name = "groups.get", skip(self), err)]
    pub async fn get(&self, group_id: i64) -> ServiceResult<Group> {
        let row: Option<GroupRow> =
            sqlx::query_as(&format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.id = $1"))
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Group::from)
            .ok_or_else(|| ServiceError::NotFound(format!("group {group_id}")))
    }

    #[instrument(name = "groups.is_member", skip(self), err)]
    pub async fn is_member(&self, user_id: i64, group_id: i64) -> ServiceResult<bool> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }

    /// Resolve `key` and require `user_id` to be a member of it.
    pub async fn require_member(&self, user_id: i64, key: &str) -> ServiceResult<Group> {
        let group = self.get_by_key(key).await?;
        if self.is_member(user_id, group.id).await? {
            Ok(group)
        } else {
            Err(ServiceError::Forbidden(format!(
                "user {user_id} is not a member of group {key}"
            )))
        }
    }

    #[instrument(name = "groups.members", skip(self), err)]
    pub async fn members(&self, group_id: i64) -> ServiceResult<Vec<User>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r"SELECT u.id, u.name, u.nickname, u.email, u.is_llm, u.created_at
              FROM users u
              JOIN group_members m ON m.user_id = u.id
              WHERE m.group_id = $1
              ORDER BY u.id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Add `user_id` to the group named by `key`. Joining twice is a no-op.
    #[instrument(name = "groups.join", skip(self), err)]
    pub async fn join(&self, user_id: i64, key: &str) -> ServiceResult<Group> {
        let group = self.get_by_key(key).await?;
        self.insert_members(group.id, &[user_id]).await?;
        Ok(group)
    }

    /// Add several users at once; returns the ids that were not already members.
    #[instrument(name = "groups.add_members", skip(self), err)]
    pub async fn add_members(&self, group_id: i64, user_ids: &[i64]) -> ServiceResult<Vec<i64>> {
        if user_ids.is_empty() {
            return Err(ServiceError::Validation("userIds must not be empty".into()));
        }
        self.insert_members(group_id, user_ids).await
    }

    async fn insert_members(&self, group_id: i64, user_ids: &[i64]) -> ServiceResult<Vec<i64>> {
        let added: Vec<i64> = sqlx::query_scalar(
            r"INSERT INTO group_members (group_id, user_id)
              SELECT $1, u FROM UNNEST($2::BIGINT[]) AS u
              ON CONFLICT (group_id, user_id) DO NOTHING
              RETURNING user_id",
        )
        .bind(group_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::from_db_error)?;
        Ok(added)
    }
}
