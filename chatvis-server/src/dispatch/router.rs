//! Routes the hub's intake stream to the owning agent.

use std::sync::Arc;

use shared::models::ChatMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::hub::{Hub, IntakeStream};

use super::dispatcher::AgentDispatcher;

/// Pick the agent that should answer `message`.
///
/// Messages written by any agent are never routed. Otherwise the first dispatcher, in
/// configuration order, whose agent is a member of the message's group wins.
#[must_use]
pub fn select_agent<'a>(
    dispatchers: &'a [Arc<AgentDispatcher>],
    hub: &Hub,
    message: &ChatMessage,
) -> Option<&'a Arc<AgentDispatcher>> {
    if dispatchers
        .iter()
        .any(|dispatcher| dispatcher.agent_id() == message.sender_id)
    {
        return None;
    }
    dispatchers
        .iter()
        .find(|dispatcher| hub.is_member(dispatcher.agent_id(), &message.group_id))
}

/// Drain `intake` until it closes or `cancel` fires.
pub async fn route_intake(
    mut intake: IntakeStream,
    dispatchers: Arc<[Arc<AgentDispatcher>]>,
    hub: Arc<Hub>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = intake.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match select_agent(&dispatchers, &hub, &message) {
            Some(dispatcher) => {
                trace!(agent_id = dispatcher.agent_id(), group = %message.group_id, "routing message");
                if !dispatcher.offer(message) {
                    debug!(agent_id = dispatcher.agent_id(), "agent intake closed; message dropped");
                }
            }
            None => trace!(group = %message.group_id, sender = message.sender_id, "no agent for message"),
        }
    }
    debug!("intake router stopped");
}
