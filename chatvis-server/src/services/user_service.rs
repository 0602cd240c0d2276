//! User accounts: registration, credential checks and the stored session token.

use chrono::{DateTime, Utc};
use shared::models::{RegisterRequest, User};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::auth::{AuthError, hash_password, verify_password};

use super::errors::{ServiceError, ServiceResult};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    nickname: Option<String>,
    email: String,
    is_llm: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
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

#[derive(Debug, FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

const USER_COLUMNS: &str = "id, name, nickname, email, is_llm, created_at";

#[derive(Clone, Debug)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(name = "users.register", skip(self, request), fields(email = %request.email), err)]
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<User> {
        let RegisterRequest {
            name,
            nickname,
            email,
            password,
        } = request;
        let email = normalize_email(&email);
        validate_registration(&name, &email, &password)?;

        let hash = hash_password(&password)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let row: UserRow = sqlx::query_as(&format!(
            r"INSERT INTO users (name, nickname, email, password_hash)
              VALUES ($1, $2, $3, $4)
              RETURNING {USER_COLUMNS}"
        ))
        .bind(name.trim())
        .bind(nickname.as_deref().map(str::trim).filter(|n| !n.is_empty()))
        .bind(&email)
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(ServiceError::from_db_error)?;

        Ok(row.into())
    }

    /// Check an email/password pair.
    #[instrument(name = "users.authenticate", skip(self, password), err)]
    pub async fn authenticate(&self, email: &str, password: &str) -> ServiceResult<User> {
        let row: Option<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| ServiceError::Unauthorized("invalid credentials".into()))?;
        match verify_password(&row.password_hash, password) {
            Ok(()) => Ok(row.user.into()),
            Err(AuthError::InvalidCredentials) => {
                Err(ServiceError::Unauthorized("invalid credentials".into()))
            }
            Err(other) => Err(ServiceError::Validation(other.to_string())),
        }
    }

    /// Remember the most recently issued token for `user_id`.
    #[instrument(name = "users.store_token", skip(self, token), err)]
    pub async fn store_token(&self, user_id: i64, token: &str) -> ServiceResult<()> {
        sqlx::query("UPDATE users SET token = $2 WHERE id = $1")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(name = "users.clear_token", skip(self), err)]
    pub async fn clear_token(&self, user_id: i64) -> ServiceResult<()> {
        sqlx::query("UPDATE users SET token = NULL WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(name = "users.get", skip(self), err)]
    pub async fn get(&self, user_id: i64) -> ServiceResult<User> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::from)
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }

    #[instrument(name = "users.find_by_email", skip(self), err)]
    pub async fn find_by_email(&self, email: &str) -> ServiceResult<User> {
        let email = normalize_email(email);
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::from)
            .ok_or_else(|| ServiceError::NotFound(format!("user {email}")))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(name: &str, email: &str, password: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("name is required".into()));
    }
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(ServiceError::Validation("email is not valid".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
