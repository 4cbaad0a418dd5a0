//! Replication of [`GameState`](crate::state::GameState) between clients.
//!
//! There is no server. Each client holds its own replica and talks to the
//! others over a pub/sub broker:
//!
//! ```text
//!  ┌──────────┐   actions, presence    ┌──────────┐
//!  │ client A │ ◀────────────────────▶ │ client B │
//!  │ Replica  │                        │ Replica  │
//!  └────┬─────┘                        └────┬─────┘
//!       │   snapshots (retained, versioned) │
//!       └──────────────▶ broker ◀───────────┘
//! ```
//!
//! - `message` - wire codec and room topics
//! - `transport` - the [`Link`] trait and an in-memory broker
//! - `replica` - snapshot/action reconciliation and room bootstrap
//! - `presence` - liveness classification and host election
//! - `config` - timing knobs
//! - `client` - the tokio event loop tying it together

pub mod client;
pub mod config;
pub mod message;
pub mod presence;
pub mod replica;
pub mod transport;

pub use client::{connect, probe_room, spawn, ClientHandle, Command};
pub use config::SyncConfig;
pub use message::{
    generate_room_code, normalize_room_code, Channel, Control, Message, MessageError,
    PresencePing, RoomTopics,
};
pub use presence::Thresholds;
pub use replica::{Bootstrap, Replica, View};
pub use transport::{ConnectionStatus, Link, MemoryBus, MemoryLink, Packet, TransportError, Will};
