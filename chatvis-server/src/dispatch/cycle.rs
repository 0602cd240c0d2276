//! One agent response cycle: unseen window in, at most one persisted and broadcast reply out.

use std::{sync::Arc, time::Duration};

use metrics::histogram;
use shared::{
    llms::{CompletionClient, LLMError},
    models::{ChatMessage, NewMessage},
};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::{
    hub::Hub,
    services::{GroupDirectory, MessageStore},
};

use super::{
    checkpoint::CheckpointLocks,
    errors::CycleError,
    prompt::build_prompt,
    reply::{AnswerIdWarning, parse_reply},
};

/// Envelope for one inbound message routed to one agent.
#[derive(Debug, Clone)]
pub struct Job {
    pub message: ChatMessage,
}

impl Job {
    #[must_use]
    pub fn new(message: ChatMessage) -> Self {
        Self { message }
    }

    /// Key of the group the job was triggered in.
    #[must_use]
    pub fn group_key(&self) -> &str {
        &self.message.group_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing past the checkpoint needed an answer.
    NothingNew,
    Replied {
        /// The persisted reply as it was broadcast.
        reply: ChatMessage,
        /// Id of the last message the cycle considered.
        checkpoint: i64,
        /// Whether the checkpoint write succeeded.
        checkpoint_advanced: bool,
        warning: Option<AnswerIdWarning>,
    },
}

/// Everything one agent needs to run cycles. Shared by all of that agent's workers.
pub struct AgentContext {
    agent_id: i64,
    label: String,
    system_prompt: Option<String>,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn GroupDirectory>,
    completion: Arc<dyn CompletionClient>,
    hub: Arc<Hub>,
    locks: Arc<CheckpointLocks>,
    completion_timeout: Duration,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("label", &self.label)
            .field("model", &self.completion.model_name())
            .field("completion_timeout", &self.completion_timeout)
            .finish_non_exhaustive()
    }
}

/// Shared collaborators handed to every agent.
#[derive(Clone)]
pub struct DispatchServices {
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn GroupDirectory>,
    pub hub: Arc<Hub>,
    pub locks: Arc<CheckpointLocks>,
}

impl DispatchServices {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn GroupDirectory>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            store,
            directory,
            hub,
            locks: Arc::new(CheckpointLocks::new()),
        }
    }
}

impl AgentContext {
    pub fn new(
        agent_id: i64,
        label: impl Into<String>,
        system_prompt: Option<String>,
        completion: Arc<dyn CompletionClient>,
        services: &DispatchServices,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            agent_id,
            label: label.into(),
            system_prompt,
            store: Arc::clone(&services.store),
            directory: Arc::clone(&services.directory),
            completion,
            hub: Arc::clone(&services.hub),
            locks: Arc::clone(&services.locks),
            completion_timeout,
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> i64 {
        self.agent_id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn hub(&self) -> &Hub {
        &self.hub
    }

    pub(crate) fn directory(&self) -> &dyn GroupDirectory {
        self.directory.as_ref()
    }

    /// Process the unseen window of the job's group.
    ///
    /// The `(agent, group)` checkpoint lock is held from the checkpoint read until the reply
    /// has been broadcast, so racing triggers for the same pair run one after the other and
    /// the later one finds nothing new.
    ///
    /// # Errors
    /// Returns a [`CycleError`] when no reply was produced. The checkpoint only moves after
    /// the reply has been persisted.
    #[instrument(
        name = "agent.cycle",
        skip(self, job),
        fields(agent_id = self.agent_id, group = %job.group_key()),
        err
    )]
    pub async fn run_cycle(&self, job: &Job) -> Result<CycleOutcome, CycleError> {
        let group_key = job.group_key();
        let group_id = self
            .directory
            .resolve_group(group_key)
            .await
            .map_err(CycleError::Group)?;

        let _guard = self.locks.acquire(self.agent_id, group_id).await;

        let after = self
            .store
            .checkpoint(self.agent_id, group_id)
            .await
            .map_err(CycleError::History)?;
        let window = self
            .store
            .fetch_unseen(self.agent_id, group_id, after)
            .await
            .map_err(CycleError::History)?;

        let Some(last_seen) = window.last().map(|message| message.id) else {
            debug!(after, "no unseen messages");
            return Ok(CycleOutcome::NothingNew);
        };
        if window.iter().all(|message| message.sender_id == self.agent_id) {
            debug!(after, "window holds only the agent's own messages");
            return Ok(CycleOutcome::NothingNew);
        }

        let system_prompt = self.system_prompt.as_deref();
        let history = build_prompt(self.agent_id, system_prompt, &window);
        let raw = self.complete(&history).await?;
        let reply = parse_reply(&raw, system_prompt.is_some())?;

        let stored = self
            .store
            .append(NewMessage {
                group_id,
                sender_id: self.agent_id,
                content: reply.content,
                answer_id: reply.answer.message_id(),
            })
            .await
            .map_err(CycleError::Persist)?;

        let checkpoint_advanced = match self
            .store
            .set_checkpoint(self.agent_id, group_id, last_seen)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, message_id = stored.id, "reply persisted but checkpoint not advanced");
                false
            }
        };

        let outbound = stored.to_chat_message(group_key);
        self.hub.broadcast(&outbound);

        Ok(CycleOutcome::Replied {
            reply: outbound,
            checkpoint: last_seen,
            checkpoint_advanced,
            warning: reply.warning,
        })
    }

    async fn complete(&self, history: &[shared::llms::ChatTurn]) -> Result<String, CycleError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.completion_timeout, self.completion.complete(history))
            .await;
        histogram!("agent_completion_seconds", "agent" => self.label.clone())
            .record(started.elapsed().as_secs_f64());

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(LLMError::timeout(self.completion_timeout).into());
            }
        };
        if text.trim().is_empty() {
            return Err(LLMError::EmptyResponse.into());
        }
        Ok(text)
    }
}
