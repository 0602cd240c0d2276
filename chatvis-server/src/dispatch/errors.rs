use shared::llms::LLMError;
use thiserror::Error;

use crate::services::{DirectoryError, StoreError};

use super::reply::ReplyParseError;

/// How a failed cycle is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The unseen window stays unacknowledged and is picked up by the next trigger.
    Transient,
    /// The job is dropped; nothing about it will get better on retry.
    Invalid,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Invalid => "invalid",
        }
    }
}

/// Why one agent cycle produced no reply. None of these stop the dispatcher.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("group lookup failed: {0}")]
    Group(#[source] DirectoryError),
    #[error("history fetch failed: {0}")]
    History(#[source] StoreError),
    #[error("completion failed: {0}")]
    Completion(#[from] LLMError),
    #[error("agent reply rejected: {0}")]
    Reply(#[from] ReplyParseError),
    #[error("reply could not be persisted: {0}")]
    Persist(#[source] StoreError),
}

impl CycleError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Group(DirectoryError::GroupNotFound(_) | DirectoryError::UserNotFound(_))
            | Self::Reply(_) => ErrorKind::Invalid,
            Self::Group(DirectoryError::Database(_))
            | Self::History(_)
            | Self::Completion(_)
            | Self::Persist(_) => ErrorKind::Transient,
        }
    }

    /// Short label used for the `reason` metric label.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::History(_) => "history",
            Self::Completion(err) => err.kind(),
            Self::Reply(_) => "reply",
            Self::Persist(_) => "persist",
        }
    }
}
