use std::sync::Arc;

use shared::config::server::WebSocketConfig;
use sqlx::PgPool;

use crate::{
    auth::TokenService,
    hub::Hub,
    http::error::{ApiError, AppResult},
    services::{GroupDirectory, GroupService, MessageStore, PgMessageStore, UserService},
};

/// Shared by every route. The database-backed pieces are optional so routers can be
/// exercised without a database.
#[derive(Clone)]
pub struct AppState {
    pub(crate) pool: Option<PgPool>,
    pub(crate) hub: Arc<Hub>,
    pub(crate) tokens: Arc<TokenService>,
    pub(crate) messages: Option<Arc<dyn MessageStore>>,
    pub(crate) directory: Option<Arc<dyn GroupDirectory>>,
    pub(crate) websocket: WebSocketConfig,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, tokens: Arc<TokenService>, websocket: WebSocketConfig) -> Self {
        Self {
            pool: None,
            hub,
            tokens,
            messages: None,
            directory: None,
            websocket,
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_stores(
        mut self,
        messages: Arc<dyn MessageStore>,
        directory: Arc<dyn GroupDirectory>,
    ) -> Self {
        self.messages = Some(messages);
        self.directory = Some(directory);
        self
    }

    fn pool(&self) -> AppResult<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| ApiError::service_unavailable("database is not configured"))
    }

    pub(crate) fn users(&self) -> AppResult<UserService> {
        self.pool().map(|pool| UserService::new(pool.clone()))
    }

    pub(crate) fn groups(&self) -> AppResult<GroupService> {
        self.pool().map(|pool| GroupService::new(pool.clone()))
    }

    /// Concrete store for the CRUD helpers that are not part of [`MessageStore`].
    pub(crate) fn message_rows(&self) -> AppResult<PgMessageStore> {
        self.pool().map(|pool| PgMessageStore::new(pool.clone()))
    }

    pub(crate) fn message_store(&self) -> AppResult<Arc<dyn MessageStore>> {
        self.messages
            .clone()
            .ok_or_else(|| ApiError::service_unavailable("message store is not configured"))
    }

    pub(crate) fn group_directory(&self) -> AppResult<Arc<dyn GroupDirectory>> {
        self.directory
            .clone()
            .ok_or_else(|| ApiError::service_unavailable("group directory is not configured"))
    }
}
