//! Wire and domain models shared by the HTTP API, the WebSocket protocol and the stores.

pub mod auth;
pub mod group;
pub mod message;
pub mod user;

pub use auth::{AUTH_FAILED, AUTH_SUCCEEDED, AuthFrame, LoginRequest, LoginResponse, RegisterRequest};
pub use group::{AddMembersRequest, CreateGroupRequest, Group, JoinGroupRequest};
pub use message::{
    AgentCheckpoint, ChatMessage, CreateMessageRequest, NewMessage, StoredMessage,
    UpdateMessageRequest,
};
pub use user::User;
