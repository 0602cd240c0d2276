use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use shared::{
    config::{AgentConfig, server::DispatchConfig},
    llms::{CompletionClient, HttpCompletionClient, LLMResult},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::hub::IntakeStream;

use super::{
    cycle::{AgentContext, DispatchServices},
    dispatcher::AgentDispatcher,
    router::route_intake,
};

/// Everything needed to start one agent.
#[derive(Clone)]
pub struct AgentSpec {
    pub config: AgentConfig,
    pub workers: usize,
    pub queue_capacity: usize,
    pub completion: Arc<dyn CompletionClient>,
}

impl std::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpec")
            .field("agent", &self.config.label())
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("model", &self.completion.model_name())
            .finish()
    }
}

impl AgentSpec {
    /// Build a spec backed by an [`HttpCompletionClient`].
    ///
    /// # Errors
    /// Fails when the HTTP client cannot be constructed from the agent's completion config.
    pub fn from_config(config: AgentConfig, dispatch: &DispatchConfig) -> LLMResult<Self> {
        let completion = HttpCompletionClient::new(
            config.completion.clone(),
            Duration::from_secs(dispatch.completion_timeout_seconds),
        )?;
        Ok(Self {
            workers: dispatch.workers_for(&config),
            queue_capacity: dispatch.queue_capacity_for(&config),
            completion: Arc::new(completion),
            config,
        })
    }
}

/// The running dispatch subsystem: one dispatcher per agent plus the intake router.
#[derive(Debug)]
pub struct DispatchRuntime {
    dispatchers: Arc<[Arc<AgentDispatcher>]>,
    router: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl DispatchRuntime {
    /// Start every agent in `agents`, in order, then begin routing `intake`.
    ///
    /// The agent list is explicit; there is no global registry of agent identities.
    pub async fn start(
        agents: Vec<AgentSpec>,
        services: DispatchServices,
        intake: IntakeStream,
        completion_timeout: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let mut dispatchers = Vec::with_capacity(agents.len());
        for spec in agents {
            let context = AgentContext::new(
                spec.config.user_id,
                spec.config.label(),
                spec.config.effective_system_prompt().map(str::to_string),
                spec.completion,
                &services,
                completion_timeout,
            );
            let dispatcher = AgentDispatcher::start(
                Arc::new(context),
                spec.workers,
                spec.queue_capacity,
                &cancel,
            )
            .await;
            dispatchers.push(Arc::new(dispatcher));
        }

        let dispatchers: Arc<[Arc<AgentDispatcher>]> = dispatchers.into();
        let router = tokio::spawn(route_intake(
            intake,
            Arc::clone(&dispatchers),
            Arc::clone(&services.hub),
            cancel.clone(),
        ));
        info!(agents = dispatchers.len(), "dispatch runtime started");

        Self {
            dispatchers,
            router: Mutex::new(Some(router)),
            cancel,
        }
    }

    #[must_use]
    pub fn dispatchers(&self) -> &[Arc<AgentDispatcher>] {
        &self.dispatchers
    }

    /// Cancel routing and intake, then wait for in-flight jobs. Safe to call again.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            if let Err(err) = router.await {
                error!(error = %err, "intake router ended abnormally");
            }
        }
        for dispatcher in self.dispatchers.iter() {
            dispatcher.shutdown().await;
        }
    }
}
