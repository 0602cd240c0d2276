use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat group. Clients address groups by `key`; stores use `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

/// `POST /api/groups`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateGroupRequest {
    pub name: String,
}

/// `POST /api/groups/join`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinGroupRequest {
    pub key: String,
}

/// `POST /api/groups/{key}/members`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
}
