//! Participant record and transport handle
//!
//! One [`Participant`] exists per live connection, from transport accept to
//! transport close. The record carries the tree position (`parent`,
//! `children`) and the liveness timestamp; the [`ConnectionHandle`] is the
//! write side of the connection, shared with the liveness monitor so it can
//! terminate a silent peer without touching the registry.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Outbound, ParticipantId, Role};

/// Write handle for one participant's connection
///
/// Sends are best-effort: a full outbound queue drops the frame rather than
/// blocking the dispatcher, and a closed queue means the connection driver
/// is already gone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle from the connection driver's queue and shutdown token
    pub fn new(outbound: mpsc::Sender<Outbound>, shutdown: CancellationToken) -> Self {
        Self { outbound, shutdown }
    }

    /// Queue a frame for delivery; returns false if it was dropped
    pub fn send(&self, message: Outbound) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the connection driver to close the transport
    ///
    /// Idempotent. The driver reacts by closing the socket and posting the
    /// standard close command, so all registry mutation stays on the
    /// dispatcher.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether a close has been requested
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// State for a single participant
#[derive(Debug)]
pub struct Participant {
    /// Unique id, allocated on connect, never reused
    pub id: ParticipantId,

    /// Short human-readable tag (`fm` + 4-5 digits)
    pub label: String,

    /// Current role; transitions away from `Unregistered` at most once
    pub role: Role,

    /// Parent in the tree; `None` for the broadcaster and for orphans
    pub parent: Option<ParticipantId>,

    /// Children ids in insertion order
    pub children: Vec<ParticipantId>,

    /// Monotonic timestamp of the most recent heartbeat
    pub last_seen: Instant,

    /// Order in which `register` was accepted; `None` until registered
    pub registered_seq: Option<u64>,

    /// Write side of the connection
    pub transport: ConnectionHandle,
}

impl Participant {
    /// Create a fresh, unregistered participant
    pub fn new(id: ParticipantId, label: String, transport: ConnectionHandle) -> Self {
        Self {
            id,
            label,
            role: Role::Unregistered,
            parent: None,
            children: Vec::new(),
            last_seen: Instant::now(),
            registered_seq: None,
            transport,
        }
    }

    /// Current child count
    pub fn load(&self) -> usize {
        self.children.len()
    }

    /// A listener that is registered but currently has no parent
    pub fn is_orphan(&self) -> bool {
        self.role == Role::Listener && self.parent.is_none()
    }
}

/// Read-only view of a participant for the admin endpoint
///
/// `last_seen` is reported as seconds since the last heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub label: String,
    pub role: Role,
    pub parent: Option<ParticipantId>,
    pub children: Vec<ParticipantId>,
    pub last_seen: f64,
}

impl ParticipantSnapshot {
    /// Capture a participant's current state
    pub fn capture(participant: &Participant, now: Instant) -> Self {
        Self {
            id: participant.id,
            label: participant.label.clone(),
            role: participant.role,
            parent: participant.parent,
            children: participant.children.clone(),
            last_seen: now.duration_since(participant.last_seen).as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with_capacity(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(tx, CancellationToken::new()), rx)
    }

    fn probe_frame() -> Outbound {
        Outbound::Reassigned { new_parent: None }
    }

    #[test]
    fn test_send_best_effort_on_full_queue() {
        let (handle, _rx) = handle_with_capacity(1);

        assert!(handle.send(probe_frame()));
        // Queue is full; the second frame is dropped, not blocked on.
        assert!(!handle.send(probe_frame()));
    }

    #[test]
    fn test_send_to_closed_queue_reports_drop() {
        let (handle, rx) = handle_with_capacity(1);
        drop(rx);

        assert!(!handle.send(probe_frame()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (handle, _rx) = handle_with_capacity(1);

        assert!(!handle.is_closing());
        handle.close();
        handle.close();
        assert!(handle.is_closing());
    }

    #[test]
    fn test_new_participant_is_unregistered_orphanless() {
        let (handle, _rx) = handle_with_capacity(1);
        let p = Participant::new(ParticipantId(1), "fm1000".to_string(), handle);

        assert_eq!(p.role, Role::Unregistered);
        assert!(p.parent.is_none());
        assert!(p.children.is_empty());
        assert!(!p.is_orphan()); // not a listener yet
        assert_eq!(p.load(), 0);
    }

    #[test]
    fn test_snapshot_reports_heartbeat_age() {
        let (handle, _rx) = handle_with_capacity(1);
        let p = Participant::new(ParticipantId(4), "fm4242".to_string(), handle);

        let snap = ParticipantSnapshot::capture(&p, p.last_seen + std::time::Duration::from_secs(3));
        assert_eq!(snap.id, ParticipantId(4));
        assert!((snap.last_seen - 3.0).abs() < 0.01);
    }
}
