use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public view of a user account. Never carries the password hash or session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub nickname: Option<String>,
    pub email: String,
    /// Set for accounts driven by an AI agent.
    pub is_llm: bool,
    pub created_at: DateTime<Utc>,
}
