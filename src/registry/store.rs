//! Registry implementation
//!
//! Arena-style map from participant id to record, plus the id and
//! registration-order allocators and the broadcaster slot. All edge
//! changes go through [`Registry::link`] / [`Registry::unlink`] so the
//! `parent`/`children` views never disagree.

use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;

use crate::protocol::{Outbound, ParticipantId, Role};

use super::participant::{ConnectionHandle, Participant, ParticipantSnapshot};

/// Authoritative participant and tree state
///
/// Single-writer: only the dispatcher task holds a mutable reference.
#[derive(Debug, Default)]
pub struct Registry {
    /// All live participants keyed by id
    participants: HashMap<ParticipantId, Participant>,

    /// Id of the broadcaster, if one has registered
    broadcaster: Option<ParticipantId>,

    /// Next id to allocate; monotone, never reused
    next_id: u64,

    /// Next registration sequence number
    next_seq: u64,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Id of the current broadcaster, if any
    pub fn broadcaster(&self) -> Option<ParticipantId> {
        self.broadcaster
    }

    /// Get a participant by id
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Get a participant mutably by id
    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    /// Whether a participant with this id is live
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Iterate over all participants in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Admit a new connection: allocate `(id, label)` and insert an
    /// unregistered participant with `last_seen = now`
    pub fn add(&mut self, transport: ConnectionHandle) -> (ParticipantId, String) {
        let id = ParticipantId(self.next_id);
        self.next_id += 1;

        // fm + 4-5 decimal digits
        let label = format!("fm{}", rand::thread_rng().gen_range(1_000..100_000));

        self.participants
            .insert(id, Participant::new(id, label.clone(), transport));

        (id, label)
    }

    /// Remove a participant, returning its record
    ///
    /// Only removes the map entry (and clears the broadcaster slot if it
    /// pointed here); the caller runs the departure repair over the
    /// returned record's `parent` and `children`.
    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let removed = self.participants.remove(&id);
        if removed.is_some() && self.broadcaster == Some(id) {
            self.broadcaster = None;
        }
        removed
    }

    /// Record an accepted `register`: set the role and stamp the
    /// registration sequence
    ///
    /// The caller has already validated the transition (role must still be
    /// `Unregistered`, and only one broadcaster may exist).
    pub fn mark_registered(&mut self, id: ParticipantId, role: Role) {
        let seq = self.next_seq;
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.role = role;
            participant.registered_seq = Some(seq);
            self.next_seq += 1;
            if role == Role::Broadcaster {
                self.broadcaster = Some(id);
            }
        }
    }

    /// Attach `child` under `parent`, keeping both views consistent
    ///
    /// `child` must currently be parentless; capacity is the placement
    /// layer's concern, not the registry's.
    pub fn link(&mut self, child: ParticipantId, parent: ParticipantId) {
        debug_assert_ne!(child, parent, "participant cannot parent itself");

        if let Some(record) = self.participants.get_mut(&child) {
            debug_assert!(record.parent.is_none(), "linking an already-linked child");
            record.parent = Some(parent);
        } else {
            return;
        }
        if let Some(record) = self.participants.get_mut(&parent) {
            if !record.children.contains(&child) {
                record.children.push(child);
            }
        }
    }

    /// Detach `child` from its parent, if any; returns the old parent
    pub fn unlink(&mut self, child: ParticipantId) -> Option<ParticipantId> {
        let old_parent = self.participants.get_mut(&child)?.parent.take()?;
        if let Some(record) = self.participants.get_mut(&old_parent) {
            record.children.retain(|&c| c != child);
        }
        Some(old_parent)
    }

    /// Child count of a participant (0 if unknown)
    pub fn load(&self, id: ParticipantId) -> usize {
        self.participants.get(&id).map_or(0, Participant::load)
    }

    /// Orphaned listeners in registration order
    pub fn orphans(&self) -> Vec<ParticipantId> {
        let mut orphans: Vec<(u64, ParticipantId)> = self
            .participants
            .values()
            .filter(|p| p.is_orphan())
            .map(|p| (p.registered_seq.unwrap_or(u64::MAX), p.id))
            .collect();
        orphans.sort();
        orphans.into_iter().map(|(_, id)| id).collect()
    }

    /// Best-effort send to one participant; silently drops if the id is
    /// unknown or the transport is not writable
    pub fn send_to(&self, id: ParticipantId, message: Outbound) {
        if let Some(participant) = self.participants.get(&id) {
            if !participant.transport.send(message) {
                tracing::debug!(id = %id, "frame dropped (transport not writable)");
            }
        } else {
            tracing::debug!(id = %id, "frame dropped (unknown participant)");
        }
    }

    /// Consistent snapshot of every participant for the admin view
    pub fn snapshot(&self) -> Vec<ParticipantSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<ParticipantSnapshot> = self
            .participants
            .values()
            .map(|p| ParticipantSnapshot::capture(p, now))
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }
}
