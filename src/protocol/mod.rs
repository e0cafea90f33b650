//! Wire protocol for the broadcast fabric
//!
//! Participants exchange single-object JSON frames over a persistent
//! WebSocket connection. Every frame carries a string `type` tag; the
//! inbound and outbound vocabularies are modeled as tagged enums so
//! dispatch is exhaustive rather than stringly-typed.

pub mod message;

pub use message::{Inbound, Outbound, ParticipantId, Role};
