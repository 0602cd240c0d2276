//! Per-agent intake stage and bounded worker pool.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use futures::future::join_all;
use metrics::counter;
use shared::models::ChatMessage;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    cycle::{AgentContext, CycleOutcome, Job},
    errors::ErrorKind,
};

/// Runs one agent: subscribe, filter the broadcast feed, process jobs until cancelled.
///
/// The intake task is the only producer on the job queue. It drops its sender when it
/// observes cancellation or a closed input, and the workers see the queue close only after
/// that.
#[derive(Debug)]
pub struct AgentDispatcher {
    agent_id: i64,
    label: String,
    input: mpsc::UnboundedSender<ChatMessage>,
    subscribed: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentDispatcher {
    /// Subscribe the agent to its groups and spawn its intake task and `workers` workers.
    ///
    /// A directory failure while subscribing is logged; the agent then stays unsubscribed
    /// and receives no work until restarted.
    pub async fn start(
        context: Arc<AgentContext>,
        workers: usize,
        queue_capacity: usize,
        parent: &CancellationToken,
    ) -> Self {
        let agent_id = context.agent_id();
        let label = context.label().to_string();
        let subscribed = subscribe(&context).await;

        let cancel = parent.child_token();
        let (input, input_rx) = mpsc::unbounded_channel();
        let (jobs_tx, jobs_rx) = mpsc::channel(queue_capacity.max(1));
        let jobs_rx = Arc::new(AsyncMutex::new(jobs_rx));

        let workers = workers.max(1);
        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(run_intake(
            Arc::clone(&context),
            input_rx,
            jobs_tx,
            cancel.clone(),
        )));
        for worker in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                Arc::clone(&context),
                Arc::clone(&jobs_rx),
                cancel.clone(),
                worker,
            )));
        }

        info!(agent_id, agent = %label, workers, queue_capacity, subscribed, "agent dispatcher started");

        Self {
            agent_id,
            label,
            input,
            subscribed: AtomicBool::new(subscribed),
            cancel,
            tasks: Mutex::new(tasks),
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

    /// Whether the startup subscription succeeded.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Hand a broadcast message to this agent's intake stage.
    ///
    /// Returns `false` once the intake stage has stopped.
    pub fn offer(&self, message: ChatMessage) -> bool {
        self.input.send(message).is_ok()
    }

    /// Stop intake, let in-flight jobs finish and wait for every task. Safe to call again.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if tasks.is_empty() {
            return;
        }
        for result in join_all(tasks).await {
            if let Err(err) = result {
                error!(agent_id = self.agent_id, error = %err, "agent task ended abnormally");
            }
        }
        info!(agent_id = self.agent_id, agent = %self.label, "agent dispatcher stopped");
    }
}

async fn subscribe(context: &AgentContext) -> bool {
    let agent_id = context.agent_id();
    match context.directory().groups_for_user(agent_id).await {
        Ok(groups) => {
            debug!(agent_id, groups = groups.len(), "agent subscribed");
            context.hub().subscribe_to_groups(agent_id, groups);
            true
        }
        Err(err) => {
            warn!(agent_id, error = %err, "agent subscription failed; agent stays idle");
            false
        }
    }
}

async fn run_intake(
    context: Arc<AgentContext>,
    mut input: mpsc::UnboundedReceiver<ChatMessage>,
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
) {
    let agent_id = context.agent_id();
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = input.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if message.sender_id == agent_id {
            continue;
        }
        if !context.hub().is_member(agent_id, &message.group_id) {
            debug!(agent_id, group = %message.group_id, "not a member; skipping");
            continue;
        }

        // Blocks while the queue is full; only cancellation interrupts it.
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = jobs.send(Job::new(message)) => {
                if sent.is_err() {
                    break;
                }
                counter!("agent_jobs_enqueued_total").increment(1);
            }
        }
    }
    drop(jobs);
    debug!(agent_id, "agent intake stopped");
}

async fn run_worker(
    context: Arc<AgentContext>,
    jobs: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
    worker: usize,
) {
    let agent_id = context.agent_id();
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };
        process(&context, &job).await;
    }
    debug!(agent_id, worker, "agent worker stopped");
}

async fn process(context: &AgentContext, job: &Job) {
    let agent = context.label().to_string();
    match context.run_cycle(job).await {
        Ok(CycleOutcome::Replied { reply, .. }) => {
            counter!("agent_replies_total", "agent" => agent).increment(1);
            debug!(agent_id = context.agent_id(), reply_id = ?reply.id, "agent replied");
        }
        Ok(CycleOutcome::NothingNew) => {}
        Err(err) => {
            counter!(
                "agent_cycles_failed_total",
                "agent" => agent,
                "reason" => err.reason()
            )
            .increment(1);
            match err.kind() {
                ErrorKind::Transient => {
                    warn!(agent_id = context.agent_id(), error = %err, "agent cycle failed; window left for next trigger");
                }
                ErrorKind::Invalid => {
                    warn!(agent_id = context.agent_id(), error = %err, "agent cycle dropped");
                }
            }
        }
    }
}
