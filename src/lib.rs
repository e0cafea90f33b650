//! treecast: coordination server for a peer-to-peer audio broadcast fabric
//!
//! One participant produces an audio stream (the broadcaster); many others
//! (listeners) receive it over direct peer-to-peer media connections. To
//! keep the broadcaster's upload bounded, participants form a distribution
//! tree: the broadcaster is the root and each node forwards the stream to
//! at most a handful of children. This server carries no media. It places
//! each listener in the tree, relays the offer/answer/candidate handshakes
//! needed to open the media links, terminates dead participants, repairs
//! the tree when a node departs, and periodically rebalances it.
//!
//! # Architecture
//!
//! ```text
//!   WebSocket clients          axum endpoint            dispatcher task
//!  ┌──────────────┐   /ws    ┌──────────────┐  commands ┌─────────────┐
//!  │ broadcaster, ├─────────▶│ connection   ├──────────▶│  registry   │
//!  │ listeners    │◀─────────┤ drivers      │◀──────────┤  tree ops   │
//!  └──────────────┘  frames  └──────────────┘  outbound └─────────────┘
//!                                                  ▲ ticks
//!                                     sweep / rebalance timers
//! ```
//!
//! All registry and tree mutations happen on the dispatcher task, so any
//! two state transitions are totally ordered; connection drivers and
//! timers only post commands. Outbound frames travel through bounded
//! per-connection queues and are dropped rather than ever blocking the
//! dispatcher.
//!
//! # Module structure
//!
//! - [`protocol`] - wire vocabulary (tagged JSON messages, ids, roles)
//! - [`registry`] - participant records and the parent/children structure
//! - [`tree`] - BFS placement, departure repair, the load rebalancer
//! - [`dispatcher`] - the single-writer command loop
//! - [`server`] - config, axum listener, connection drivers, admin view

pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tree;

// Re-export main types at crate root
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{Error, Result};
pub use protocol::{Inbound, Outbound, ParticipantId, Role};
pub use registry::{Participant, ParticipantSnapshot, Registry};
pub use server::{ServerConfig, TreecastServer};
pub use tree::Capacity;
