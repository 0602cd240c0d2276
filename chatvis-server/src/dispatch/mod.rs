//! # Agent Dispatch
//!
//! Turns the hub's intake stream into agent replies.
//!
//! ```text
//! Hub::broadcast ──▶ intake stream ──▶ router ──▶ AgentDispatcher (intake task)
//!                                                   │ bounded job queue
//!                                                   ▼
//!                                                 workers ──▶ AgentContext::run_cycle
//! ```
//!
//! A cycle reads the `(agent, group)` checkpoint, fetches everything newer, asks the
//! completion client for a reply, persists it, advances the checkpoint to the last message
//! it considered and broadcasts the stored reply. Cycles for the same pair are serialized
//! through [`CheckpointLocks`].

pub mod checkpoint;
pub mod cycle;
pub mod dispatcher;
pub mod errors;
pub mod prompt;
pub mod reply;
pub mod router;
pub mod runtime;

pub use checkpoint::CheckpointLocks;
pub use cycle::{AgentContext, CycleOutcome, DispatchServices, Job};
pub use dispatcher::AgentDispatcher;
pub use errors::{CycleError, ErrorKind};
pub use reply::{AnswerIdWarning, AnswerTarget, ParsedReply, ReplyParseError, parse_reply};
pub use router::select_agent;
pub use runtime::{AgentSpec, DispatchRuntime};
