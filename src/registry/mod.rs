//! Participant registry
//!
//! The registry is the authoritative record of every connected participant
//! and of the distribution tree: each participant holds a nullable `parent`
//! id and an insertion-ordered list of `children` ids, and the registry
//! keeps the two views consistent on every link and unlink.
//!
//! # Ownership
//!
//! The registry has a single writer: the dispatcher task. Components that
//! need to mutate it (placement, rebalancing, departure repair) run inside
//! dispatcher command steps; everything else sees it only through
//! snapshots.
//!
//! # Back-references
//!
//! `parent` and `children` are two views of one relation stored as plain
//! ids in an arena-style map. Neither side holds an object reference, so
//! there is no pointer cycle to manage; consistency is enforced by
//! funneling every edge change through [`Registry::link`] and
//! [`Registry::unlink`].

pub mod participant;
pub mod store;

pub use participant::{ConnectionHandle, Participant, ParticipantSnapshot};
pub use store::Registry;
