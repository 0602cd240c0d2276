//! # Configuration
//!
//! Server, database, logging, authentication and agent settings, plus the loader that
//! layers defaults, a YAML/JSON file, `CHATVIS_*` environment variables and CLI overrides.

pub mod agents;
pub mod server;

pub use agents::{AgentConfig, CompletionConfig, CompletionEndpoint, DEFAULT_SYSTEM_PROMPT};
pub use server::{Config, ConfigError, LogFormat, Profile};
