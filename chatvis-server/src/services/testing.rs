//! In-memory stand-ins for the Postgres services, used by hub, dispatch and session tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use shared::models::{NewMessage, StoredMessage};

use super::{
    group_directory::{DirectoryError, DirectoryResult, GroupDirectory},
    message_store::{MessageStore, StoreError, StoreResult},
};

#[derive(Default)]
struct StoreState {
    messages: Vec<StoredMessage>,
    checkpoints: HashMap<(i64, i64), i64>,
}

#[derive(Default)]
pub struct MemoryMessageStore {
    state: Mutex<StoreState>,
    fail_appends: AtomicBool,
    fail_checkpoint_writes: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message directly, bypassing failure switches. Returns its id.
    pub fn seed(&self, group_id: i64, sender_id: i64, content: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = next_id(&state);
        state.messages.push(StoredMessage {
            id,
            group_id,
            sender_id,
            content: content.to_string(),
            answer_id: None,
            created_at: Utc::now(),
        });
        id
    }

    /// Insert a message with an explicit id.
    pub fn seed_with_id(&self, id: i64, group_id: i64, sender_id: i64, content: &str) {
        let mut state = self.state.lock().unwrap();
        state.messages.push(StoredMessage {
            id,
            group_id,
            sender_id,
            content: content.to_string(),
            answer_id: None,
            created_at: Utc::now(),
        });
        state.messages.sort_by_key(|message| message.id);
    }

    pub fn set_checkpoint_value(&self, agent_id: i64, group_id: i64, value: i64) {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .insert((agent_id, group_id), value);
    }

    pub fn checkpoint_value(&self, agent_id: i64, group_id: i64) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .get(&(agent_id, group_id))
            .copied()
    }

    pub fn messages_from(&self, sender_id: i64) -> Vec<StoredMessage> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|message| message.sender_id == sender_id)
            .cloned()
            .collect()
    }

    pub fn all_messages(&self) -> Vec<StoredMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

fn next_id(state: &StoreState) -> i64 {
    state.messages.iter().map(|message| message.id).max().unwrap_or(0) + 1
}

fn simulated_failure() -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::other("simulated store failure"))
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn fetch_unseen(
        &self,
        _agent_id: i64,
        group_id: i64,
        after: i64,
    ) -> StoreResult<Vec<StoredMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|message| message.group_id == group_id && message.id > after)
            .cloned()
            .collect())
    }

    async fn append(&self, message: NewMessage) -> StoreResult<StoredMessage> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Database(simulated_failure()));
        }
        let mut state = self.state.lock().unwrap();
        let answer_id = message.answer_id.filter(|target| {
            state
                .messages
                .iter()
                .any(|existing| existing.id == *target && existing.group_id == message.group_id)
        });
        let stored = StoredMessage {
            id: next_id(&state),
            group_id: message.group_id,
            sender_id: message.sender_id,
            content: message.content,
            answer_id,
            created_at: Utc::now(),
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn checkpoint(&self, agent_id: i64, group_id: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        Ok(*state.checkpoints.entry((agent_id, group_id)).or_insert(0))
    }

    async fn set_checkpoint(
        &self,
        agent_id: i64,
        group_id: i64,
        message_id: i64,
    ) -> StoreResult<()> {
        if self.fail_checkpoint_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(simulated_failure()));
        }
        let mut state = self.state.lock().unwrap();
        let entry = state.checkpoints.entry((agent_id, group_id)).or_insert(0);
        *entry = (*entry).max(message_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGroupDirectory {
    memberships: Mutex<HashMap<i64, Vec<String>>>,
    groups: Mutex<HashMap<String, i64>>,
    unavailable: AtomicBool,
}

impl MemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, key: &str, id: i64) {
        self.groups.lock().unwrap().insert(key.to_string(), id);
    }

    pub fn add_user(&self, user_id: i64, groups: &[&str]) {
        self.memberships.lock().unwrap().insert(
            user_id,
            groups.iter().map(|group| (*group).to_string()).collect(),
        );
    }

    /// Make every call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupDirectory for MemoryGroupDirectory {
    async fn groups_for_user(&self, user_id: i64) -> DirectoryResult<Vec<String>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Database(simulated_failure()));
        }
        self.memberships
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or(DirectoryError::UserNotFound(user_id))
    }

    async fn resolve_group(&self, group_key: &str) -> DirectoryResult<i64> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Database(simulated_failure()));
        }
        self.groups
            .lock()
            .unwrap()
            .get(group_key)
            .copied()
            .ok_or_else(|| DirectoryError::GroupNotFound(group_key.to_string()))
    }
}
