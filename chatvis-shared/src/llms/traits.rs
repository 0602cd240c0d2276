//! # LLM Traits

use async_trait::async_trait;

use crate::llms::{errors::LLMResult, types::ChatTurn};

/// Turns an ordered history into generated reply text.
///
/// Implementations must not retry internally; a failed call is reported and the caller
/// decides whether the work is retried.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply for `history`, oldest turn first.
    ///
    /// # Errors
    /// Returns [`LLMError::Timeout`](crate::llms::LLMError::Timeout) or
    /// [`LLMError::Unreachable`](crate::llms::LLMError::Unreachable) for transport
    /// failures, and [`LLMError::InvalidResponse`](crate::llms::LLMError::InvalidResponse)
    /// when the body cannot be decoded.
    async fn complete(&self, history: &[ChatTurn]) -> LLMResult<String>;

    /// Model identifier for logs and metrics.
    fn model_name(&self) -> &str;
}
