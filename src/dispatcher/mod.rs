//! Single-writer dispatcher
//!
//! Every mutation of the registry (registration, placement, signaling
//! side effects, departure repair, rebalancing) happens inside this one
//! task, which consumes a command queue fed by connection drivers and
//! timer tasks. Two handlers that both mutate the registry are therefore
//! totally ordered, and the tree invariants hold between commands.
//!
//! Outbound traffic never blocks the loop: sends go through each
//! connection's bounded queue with `try_send`, and the liveness sweep only
//! cancels transport tokens, feeding terminations back in as ordinary
//! close commands.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Inbound, Outbound, ParticipantId, Role};
use crate::registry::{ConnectionHandle, ParticipantSnapshot, Registry};
use crate::tree::{placement, rebalance, Capacity};

/// A unit of work for the dispatcher
#[derive(Debug)]
pub enum Command {
    /// A transport was accepted; reply carries the allocated identity
    Connect {
        transport: ConnectionHandle,
        reply: oneshot::Sender<(ParticipantId, String)>,
    },

    /// A parsed frame arrived from a participant
    Inbound {
        from: ParticipantId,
        message: Inbound,
    },

    /// A participant's transport closed (cleanly or after termination)
    Close { id: ParticipantId },

    /// Liveness sweep timer fired
    SweepTick,

    /// Rebalance timer fired
    RebalanceTick,

    /// Admin snapshot request
    Snapshot {
        reply: oneshot::Sender<Vec<ParticipantSnapshot>>,
    },
}

/// Cloneable handle for posting commands to the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    /// Announce a new connection and wait for its `(id, label)`
    ///
    /// Returns `None` if the dispatcher is gone (server shutting down).
    pub async fn connect(&self, transport: ConnectionHandle) -> Option<(ParticipantId, String)> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Connect { transport, reply }).ok()?;
        rx.await.ok()
    }

    /// Post an inbound frame
    pub fn inbound(&self, from: ParticipantId, message: Inbound) {
        let _ = self.tx.send(Command::Inbound { from, message });
    }

    /// Post a transport close
    pub fn close(&self, id: ParticipantId) {
        let _ = self.tx.send(Command::Close { id });
    }

    /// Post a liveness sweep tick
    pub fn sweep_tick(&self) {
        let _ = self.tx.send(Command::SweepTick);
    }

    /// Post a rebalance tick
    pub fn rebalance_tick(&self) {
        let _ = self.tx.send(Command::RebalanceTick);
    }

    /// Request a consistent snapshot of all participants
    pub async fn snapshot(&self) -> Vec<ParticipantSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// The dispatcher task state
#[derive(Debug)]
pub struct Dispatcher {
    registry: Registry,
    capacity: Capacity,
    heartbeat_timeout: Duration,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Dispatcher {
    /// Create a dispatcher and its command handle
    pub fn new(capacity: Capacity, heartbeat_timeout: Duration) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry: Registry::new(),
                capacity,
                heartbeat_timeout,
                rx,
            },
            DispatcherHandle { tx },
        )
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        tracing::debug!("dispatcher loop started");
        while let Some(command) = self.rx.recv().await {
            self.handle_command(command);
        }
        tracing::debug!("dispatcher loop stopped");
    }

    /// Process one command as an atomic step against the registry
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { transport, reply } => self.on_connect(transport, reply),
            Command::Inbound { from, message } => self.on_inbound(from, message),
            Command::Close { id } => self.on_close(id),
            Command::SweepTick => self.on_sweep(),
            Command::RebalanceTick => self.on_rebalance(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    /// Read-only access for assertions in tests
    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access for state injection in tests
    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    fn on_connect(
        &mut self,
        transport: ConnectionHandle,
        reply: oneshot::Sender<(ParticipantId, String)>,
    ) {
        let (id, label) = self.registry.add(transport);
        tracing::info!(id = %id, label = %label, total = self.registry.len(), "participant connected");

        if reply.send((id, label)).is_err() {
            // The connection driver died before learning its identity;
            // nobody will ever post a close for it.
            tracing::warn!(id = %id, "connection driver gone, discarding participant");
            self.registry.remove(id);
        }
    }

    fn on_inbound(&mut self, from: ParticipantId, message: Inbound) {
        if !self.registry.contains(from) {
            return;
        }

        match message {
            Inbound::Register { role, custom_id } => self.on_register(from, role, custom_id),
            Inbound::Heartbeat => self.on_heartbeat(from),
            Inbound::Offer { target, payload } => {
                self.relay(from, target, |from, payload| Outbound::Offer { from, payload }, payload);
            }
            Inbound::Answer { target, payload } => {
                self.relay(from, target, |from, payload| Outbound::Answer { from, payload }, payload);
            }
            Inbound::Candidate { target, payload } => {
                self.relay(
                    from,
                    target,
                    |from, payload| Outbound::Candidate { from, payload },
                    payload,
                );
            }
            Inbound::Cmd { payload } => self.on_cmd(from, payload),
            Inbound::Metadata { payload } => self.on_metadata(from, payload),
            Inbound::RoomMessage { payload } => self.on_room_message(from, payload),
        }
    }

    fn on_register(&mut self, from: ParticipantId, role: Role, custom_id: Option<String>) {
        if let Some(requested) = custom_id {
            tracing::debug!(id = %from, requested = %requested, "customId ignored, ids are server-allocated");
        }

        let current = match self.registry.get(from) {
            Some(p) => p.role,
            None => return,
        };
        if current != Role::Unregistered {
            tracing::debug!(id = %from, role = %current, "repeat register dropped");
            return;
        }

        match role {
            Role::Broadcaster => {
                if self.registry.broadcaster().is_some() {
                    tracing::warn!(id = %from, "second broadcaster register dropped");
                    return;
                }
                self.registry.mark_registered(from, Role::Broadcaster);
                let label = self
                    .registry
                    .get(from)
                    .map(|p| p.label.clone())
                    .unwrap_or_default();
                tracing::info!(id = %from, label = %label, "broadcaster registered");
                self.registry
                    .send_to(from, Outbound::RegisteredAsBroadcaster { id: from, label });

                // Every waiting orphan gets a seat now.
                placement::adopt_orphans(&mut self.registry, self.capacity);
            }
            Role::Listener => {
                self.registry.mark_registered(from, Role::Listener);
                tracing::info!(id = %from, "listener registered");
                placement::place(&mut self.registry, self.capacity, from);
            }
            Role::Unregistered => {
                tracing::debug!(id = %from, "register with unregistered role dropped");
            }
        }
    }

    fn on_heartbeat(&mut self, from: ParticipantId) {
        if let Some(participant) = self.registry.get_mut(from) {
            participant.last_seen = Instant::now();
        }
    }

    fn relay(
        &mut self,
        from: ParticipantId,
        target: ParticipantId,
        build: fn(ParticipantId, serde_json::Value) -> Outbound,
        payload: serde_json::Value,
    ) {
        if !self.registry.contains(target) {
            tracing::debug!(from = %from, target = %target, "handshake to unknown target dropped");
            return;
        }
        self.registry.send_to(target, build(from, payload));
    }

    fn on_cmd(&mut self, from: ParticipantId, payload: serde_json::Value) {
        if self.registry.broadcaster() != Some(from) {
            tracing::debug!(id = %from, "cmd from non-broadcaster dropped");
            return;
        }
        let recipients: Vec<ParticipantId> = self
            .registry
            .iter()
            .map(|p| p.id)
            .filter(|&id| id != from)
            .collect();
        for id in recipients {
            self.registry.send_to(
                id,
                Outbound::Cmd {
                    cmd: payload.clone(),
                },
            );
        }
    }

    fn on_metadata(&mut self, from: ParticipantId, payload: serde_json::Map<String, serde_json::Value>) {
        if self.registry.broadcaster() != Some(from) {
            tracing::debug!(id = %from, "metadata from non-broadcaster dropped");
            return;
        }
        let recipients: Vec<ParticipantId> = self
            .registry
            .iter()
            .map(|p| p.id)
            .filter(|&id| id != from)
            .collect();
        for id in recipients {
            self.registry.send_to(
                id,
                Outbound::Metadata {
                    fields: payload.clone(),
                },
            );
        }
    }

    fn on_room_message(&mut self, from: ParticipantId, payload: serde_json::Value) {
        let children = match self.registry.get(from) {
            Some(p) => p.children.clone(),
            None => return,
        };
        for child in children {
            self.registry.send_to(
                child,
                Outbound::RoomMessage {
                    from,
                    payload: payload.clone(),
                },
            );
        }
    }

    /// Standard departure path, for clean closes and forced terminations
    fn on_close(&mut self, id: ParticipantId) {
        // Unlink first so the freed slot is visible to the repair below.
        let old_parent = self.registry.unlink(id);
        let Some(dead) = self.registry.remove(id) else {
            return;
        };
        tracing::info!(
            id = %id,
            label = %dead.label,
            role = %dead.role,
            total = self.registry.len(),
            "participant disconnected"
        );

        if let Some(parent) = old_parent {
            self.registry.send_to(
                parent,
                Outbound::ChildLeft {
                    id,
                    label: dead.label.clone(),
                },
            );
        }

        placement::reassign_children_of(&mut self.registry, self.capacity, id, &dead.children);
        placement::adopt_orphans(&mut self.registry, self.capacity);
    }

    /// Liveness sweep: terminate transports of silent participants
    ///
    /// The sweep never touches the tree; the departure path runs when the
    /// terminated connection posts its close command.
    fn on_sweep(&mut self) {
        let now = Instant::now();
        for participant in self.registry.iter() {
            let silent_for = now.duration_since(participant.last_seen);
            if silent_for > self.heartbeat_timeout {
                tracing::warn!(
                    id = %participant.id,
                    label = %participant.label,
                    silent_secs = silent_for.as_secs(),
                    "heartbeat timeout, terminating transport"
                );
                participant.transport.close();
            }
        }
    }

    fn on_rebalance(&mut self) {
        let moves = rebalance::rebalance(&mut self.registry, self.capacity);
        if !moves.is_empty() {
            tracing::info!(moved = moves.len(), "rebalance pass relocated children");
        }
        // A freed or still-free slot may fit a waiting orphan.
        placement::adopt_orphans(&mut self.registry, self.capacity);
    }
}
