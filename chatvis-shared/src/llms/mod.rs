//! # LLM Integration Module
//!
//! Agents talk to their language model through the [`CompletionClient`] trait: an ordered
//! history of [`ChatTurn`]s goes in, generated text comes out. [`HttpCompletionClient`]
//! speaks the Ollama HTTP API and also understands OpenAI-style chat completion bodies.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shared::config::CompletionConfig;
//! use shared::llms::{ChatTurn, CompletionClient, HttpCompletionClient};
//!
//! let client = HttpCompletionClient::new(CompletionConfig::default())?;
//! let reply = client.complete(&[ChatTurn::user("hello")]).await?;
//! ```

pub mod errors;
pub mod http;
pub mod traits;
pub mod types;

pub use errors::{LLMError, LLMResult};
pub use http::HttpCompletionClient;
pub use traits::CompletionClient;
pub use types::{ChatTurn, TurnRole};
