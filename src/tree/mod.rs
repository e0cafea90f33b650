//! Tree formation and repair
//!
//! This module owns the distribution-tree algorithms:
//! - breadth-first placement of new and orphaned listeners
//! - orphan reassignment when an interior node departs
//! - the periodic load rebalancer
//!
//! All functions take `&mut Registry` and run inside a dispatcher command
//! step, so the tree invariants (acyclicity, bidirectional parent/children
//! consistency, capacity) hold between steps.

pub mod placement;
pub mod rebalance;

use crate::protocol::{ParticipantId, Role};
use crate::registry::Registry;

/// Fan-out limits for the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Maximum children of the broadcaster
    pub root: usize,
    /// Maximum children of any listener
    pub node: usize,
}

impl Default for Capacity {
    fn default() -> Self {
        Self { root: 2, node: 2 }
    }
}

impl Capacity {
    /// Capacity of a specific participant
    pub fn of(&self, registry: &Registry, id: ParticipantId) -> usize {
        match registry.get(id).map(|p| p.role) {
            Some(Role::Broadcaster) => self.root,
            _ => self.node,
        }
    }
}

/// Whether `node` lies in the subtree rooted at `ancestor`
///
/// Walks the parent chain from `node` upward. The walk is capped at the
/// registry size so a corrupted chain cannot loop forever.
pub(crate) fn in_subtree_of(
    registry: &Registry,
    node: ParticipantId,
    ancestor: ParticipantId,
) -> bool {
    let mut current = Some(node);
    let mut hops = 0;
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        hops += 1;
        if hops > registry.len() {
            tracing::warn!(node = %node, "parent chain longer than registry, assuming cycle");
            return true;
        }
        current = registry.get(id).and_then(|p| p.parent);
    }
    false
}
