//! Listener placement
//!
//! Placement is breadth-first from the broadcaster: the tree grows
//! shallowest-first, which minimizes relay depth and therefore media
//! latency. Within a level, candidates are visited in the insertion order
//! of each node's children list, making placement deterministic.

use std::collections::VecDeque;

use crate::protocol::{Outbound, ParticipantId};
use crate::registry::Registry;

use super::Capacity;

/// Result of a placement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Attached under the given parent
    Placed(ParticipantId),
    /// No broadcaster or no free capacity; left parentless
    Orphaned,
}

/// Find the first node, breadth-first from the broadcaster, with a free
/// child slot
///
/// Excluded nodes are neither eligible nor traversed, so an excluded
/// node's whole subtree is invisible to the search. Returns `None` when
/// there is no broadcaster or every reachable node is full.
pub fn find_parent(
    registry: &Registry,
    capacity: Capacity,
    exclude: &[ParticipantId],
) -> Option<ParticipantId> {
    let root = registry.broadcaster()?;
    if exclude.contains(&root) {
        return None;
    }

    let mut queue = VecDeque::from([root]);
    let mut visited = vec![root];

    while let Some(id) = queue.pop_front() {
        if registry.load(id) < capacity.of(registry, id) {
            return Some(id);
        }
        let Some(node) = registry.get(id) else {
            continue;
        };
        for &child in &node.children {
            if exclude.contains(&child) || visited.contains(&child) {
                continue;
            }
            visited.push(child);
            queue.push_back(child);
        }
    }

    None
}

/// Place a newly registered listener
///
/// On success the listener learns its parent via `room-assigned` and the
/// parent is told to start the media offer via `listener-joined`. Without
/// a broadcaster or free capacity the listener stays orphaned and still
/// receives `room-assigned` with a null parent.
pub fn place(registry: &mut Registry, capacity: Capacity, listener: ParticipantId) -> PlaceOutcome {
    let outcome = attach(registry, capacity, listener, &[listener]);

    let label = registry
        .get(listener)
        .map(|p| p.label.clone())
        .unwrap_or_default();
    match outcome {
        PlaceOutcome::Placed(parent) => {
            registry.send_to(
                listener,
                Outbound::RoomAssigned {
                    label,
                    parent: Some(parent),
                },
            );
        }
        PlaceOutcome::Orphaned => {
            registry.send_to(
                listener,
                Outbound::RoomAssigned {
                    label,
                    parent: None,
                },
            );
        }
    }
    outcome
}

/// Re-place a listener that already went through its initial placement
///
/// Used for orphan adoption (broadcaster registration, departure sweep,
/// rebalance tick). On success the listener receives `reassigned`; a
/// failed attempt is silent here, callers that owe a notification send it
/// themselves.
pub fn adopt(
    registry: &mut Registry,
    capacity: Capacity,
    listener: ParticipantId,
    exclude: &[ParticipantId],
) -> PlaceOutcome {
    let outcome = attach(registry, capacity, listener, exclude);
    if let PlaceOutcome::Placed(parent) = outcome {
        registry.send_to(
            listener,
            Outbound::Reassigned {
                new_parent: Some(parent),
            },
        );
    }
    outcome
}

/// Repair the tree after `dead` departed, reassigning its former children
///
/// Children are handled in insertion order. Each child is searched for a
/// new parent with `dead` and the child itself excluded; the child
/// exclusion prevents a single-step cycle, the dead exclusion covers the
/// window where a stale id could still be referenced. A child with no
/// available parent is told `reassigned{new_parent: null}` and waits for
/// the next placement opportunity.
pub fn reassign_children_of(
    registry: &mut Registry,
    capacity: Capacity,
    dead: ParticipantId,
    children: &[ParticipantId],
) {
    for &child in children {
        if let Some(record) = registry.get_mut(child) {
            record.parent = None;
        } else {
            continue;
        }

        match adopt(registry, capacity, child, &[dead, child]) {
            PlaceOutcome::Placed(parent) => {
                tracing::info!(child = %child, parent = %parent, "orphan reassigned");
            }
            PlaceOutcome::Orphaned => {
                tracing::info!(child = %child, "no capacity for orphan, leaving detached");
                registry.send_to(child, Outbound::Reassigned { new_parent: None });
            }
        }
    }
}

/// Attempt placement for every orphaned listener, in registration order
///
/// Invoked when capacity may have appeared: broadcaster registration, a
/// node departure, or a rebalance tick. Listeners that stay orphaned are
/// not re-notified; they already know.
pub fn adopt_orphans(registry: &mut Registry, capacity: Capacity) {
    for orphan in registry.orphans() {
        if let PlaceOutcome::Placed(parent) = adopt(registry, capacity, orphan, &[orphan]) {
            tracing::info!(listener = %orphan, parent = %parent, "orphan adopted");
        }
    }
}

/// Common attach path: search, then link and notify the new parent
fn attach(
    registry: &mut Registry,
    capacity: Capacity,
    listener: ParticipantId,
    exclude: &[ParticipantId],
) -> PlaceOutcome {
    let Some(parent) = find_parent(registry, capacity, exclude) else {
        return PlaceOutcome::Orphaned;
    };

    registry.link(listener, parent);

    let child_label = registry
        .get(listener)
        .map(|p| p.label.clone())
        .unwrap_or_default();
    registry.send_to(
        parent,
        Outbound::ListenerJoined {
            id: listener,
            child_label,
        },
    );

    PlaceOutcome::Placed(parent)
}
