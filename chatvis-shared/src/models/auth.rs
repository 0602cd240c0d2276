use serde::{Deserialize, Serialize};

use super::user::User;

/// Text frame sent after a WebSocket client's token has been accepted.
pub const AUTH_SUCCEEDED: &str = "authentication_successful";

/// Text frame sent before closing a WebSocket whose token was rejected.
pub const AUTH_FAILED: &str = "authentication_failed";

/// First frame a WebSocket client must send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthFrame {
    pub token: String,
}

/// `POST /api/public/login`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// `POST /api/public/register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    pub email: String,
    pub password: String,
}
