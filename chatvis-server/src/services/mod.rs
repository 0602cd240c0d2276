//! Persistence-facing services.
//!
//! The dispatch core only sees the [`MessageStore`] and [`GroupDirectory`] traits; the
//! HTTP layer additionally uses [`UserService`] and [`GroupService`] directly.

pub mod errors;
pub mod group_directory;
pub mod group_service;
pub mod message_store;
pub mod user_service;

#[cfg(test)]
pub mod testing;

pub use errors::{ServiceError, ServiceResult};
pub use group_directory::{DirectoryError, DirectoryResult, GroupDirectory, PgGroupDirectory};
pub use group_service::GroupService;
pub use message_store::{MessageStore, PgMessageStore, StoreError, StoreResult};
pub use user_service::UserService;
