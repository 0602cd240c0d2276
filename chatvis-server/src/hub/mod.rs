//! # Connection Hub
//!
//! Owns the live connection registry and the group membership index, and is the only
//! writer of fan-out broadcasts.
//!
//! Both maps live behind one mutex. Critical sections never await and never call back into
//! a hub entry point, so a broadcast cannot wait on itself. Deliveries use `try_send`: a
//! connection whose outbound buffer is full or closed is recorded during the pass and
//! removed once the pass has finished.
//!
//! Every broadcast is also forwarded, once, onto the agent intake stream before
//! [`Hub::broadcast`] returns.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use metrics::{counter, gauge};
use shared::models::ChatMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Identifies one registration; a reconnect for the same user gets a new id.
pub type ConnectionId = u64;

/// Sending half of a connection's outbound frame queue.
pub type Outbound = mpsc::Sender<ChatMessage>;

/// Receiving end of the agent intake stream.
pub type IntakeStream = mpsc::UnboundedReceiver<ChatMessage>;

pub type SharedHub = Arc<Hub>;

#[derive(Debug)]
struct Connection {
    id: ConnectionId,
    outbound: Outbound,
}

#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<i64, Connection>,
    memberships: HashMap<i64, HashSet<String>>,
}

/// Outcome of one [`Hub::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was queued on.
    pub delivered: usize,
    /// Users whose connection failed during the pass and was removed afterwards.
    pub dropped: Vec<i64>,
    /// Whether the agent intake stream accepted the message.
    pub forwarded: bool,
}

#[derive(Debug)]
pub struct Hub {
    registry: Mutex<Registry>,
    next_connection_id: AtomicU64,
    intake: mpsc::UnboundedSender<ChatMessage>,
}

impl Hub {
    /// Create a hub together with the stream every broadcast is forwarded to.
    #[must_use]
    pub fn new() -> (Self, IntakeStream) {
        let (intake, intake_rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: Mutex::new(Registry::default()),
            next_connection_id: AtomicU64::new(1),
            intake,
        };
        (hub, intake_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `outbound` as the live connection for `user_id`.
    ///
    /// A previous connection for the same user is replaced and its sender dropped, so its
    /// writer observes a closed queue and shuts the old socket.
    pub fn register(&self, user_id: i64, outbound: Outbound) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (replaced, total) = {
            let mut registry = self.lock();
            let replaced = registry
                .connections
                .insert(user_id, Connection { id, outbound })
                .is_some();
            (replaced, registry.connections.len())
        };

        record_connections(total);
        if replaced {
            counter!("hub_connection_takeovers_total").increment(1);
            info!(user_id, connection_id = id, "connection replaced previous session");
        } else {
            debug!(user_id, connection_id = id, "connection registered");
        }
        id
    }

    /// Create a bounded outbound queue of `buffer` frames and register its sender.
    pub fn connect(
        &self,
        user_id: i64,
        buffer: usize,
    ) -> (ConnectionId, mpsc::Receiver<ChatMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (self.register(user_id, tx), rx)
    }

    /// Remove whatever connection `user_id` has. Returns whether one was present.
    pub fn unregister(&self, user_id: i64) -> bool {
        let (removed, total) = {
            let mut registry = self.lock();
            let removed = registry.connections.remove(&user_id).is_some();
            (removed, registry.connections.len())
        };
        if removed {
            record_connections(total);
            debug!(user_id, "connection unregistered");
        }
        removed
    }

    /// Remove `user_id`'s connection only if it is still `connection_id`.
    ///
    /// A session that was taken over by a newer registration uses this on exit so it
    /// cannot evict its successor.
    pub fn unregister_connection(&self, user_id: i64, connection_id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut registry = self.lock();
            let current = registry
                .connections
                .get(&user_id)
                .is_some_and(|connection| connection.id == connection_id);
            if current {
                registry.connections.remove(&user_id);
            }
            (current, registry.connections.len())
        };
        if removed {
            record_connections(total);
            debug!(user_id, connection_id, "connection unregistered");
        }
        removed
    }

    /// Replace the membership set of `user_id` wholesale.
    pub fn subscribe_to_groups<I, S>(&self, user_id: i64, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: HashSet<String> = groups.into_iter().map(Into::into).collect();
        let count = groups.len();
        self.lock().memberships.insert(user_id, groups);
        debug!(user_id, groups = count, "membership replaced");
    }

    /// Point-in-time membership check against the current snapshot.
    pub fn is_member(&self, user_id: i64, group: &str) -> bool {
        self.lock()
            .memberships
            .get(&user_id)
            .is_some_and(|groups| groups.contains(group))
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.lock().connections.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Deliver `message` to every connected member of its group and forward it to the
    /// agent intake stream.
    ///
    /// Broadcasts are serialized: the fan-out and the intake forward happen under the
    /// registry lock, so every recipient observes broadcasts in call order.
    pub fn broadcast(&self, message: &ChatMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed: Vec<(i64, ConnectionId)> = Vec::new();

        {
            let registry = self.lock();
            for (user_id, connection) in &registry.connections {
                let member = registry
                    .memberships
                    .get(user_id)
                    .is_some_and(|groups| groups.contains(&message.group_id));
                if !member {
                    continue;
                }

                match connection.outbound.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(user_id = *user_id, "outbound buffer full; dropping connection");
                        failed.push((*user_id, connection.id));
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(user_id = *user_id, "outbound queue closed");
                        failed.push((*user_id, connection.id));
                    }
                }
            }

            report.forwarded = self.intake.send(message.clone()).is_ok();
        }

        counter!("hub_broadcasts_total").increment(1);
        if !report.forwarded {
            debug!(group = %message.group_id, "agent intake closed; message not forwarded");
        }

        for (user_id, connection_id) in failed {
            counter!("hub_deliveries_failed_total").increment(1);
            if self.unregister_connection(user_id, connection_id) {
                report.dropped.push(user_id);
            }
        }

        report
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_connections(total: usize) {
    gauge!("hub_connections").set(total as f64);
}
