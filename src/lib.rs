//! Thousand Sync Library
//!
//! Replicated game state for "Thousand", a dice game for two to five
//! players racing to 1000 points.
//!
//! # Overview
//!
//! - **State** - The room aggregate, player slots, the closed action set and
//!   a pure reducer. Scoring rules sit behind the `Scorer` trait.
//!
//! - **Sync** - Per-client replicas reconciled over pub/sub: versioned
//!   snapshots, optimistic actions, presence heartbeats and host failover.
//!
//! # Design Principles
//!
//! 1. **The reducer is pure** - `apply(state, action)` never panics, never
//!    performs I/O and takes its only clock from the action timestamp.
//!
//! 2. **Snapshots win by version** - A snapshot replaces local state only if
//!    it is the first one seen or its version is strictly higher.
//!
//! 3. **Serialization-ready** - Every wire type is JSON with camelCase fields.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use thousand_sync::state::{apply, Action, ActionKind, GameState, ThousandScorer};
//!
//! let join = |state: &GameState, name: &str, session: &str| {
//!     let kind = ActionKind::JoinGame {
//!         name: name.to_string(),
//!         session_id: session.to_string(),
//!     };
//!     apply(&ThousandScorer, state, &Action::new(kind, session, Utc::now()))
//! };
//!
//! let state = join(&GameState::initial(), "Ann", "s-ann");
//! let state = join(&state, "Bob", "s-bob");
//! let state = apply(
//!     &ThousandScorer,
//!     &state,
//!     &Action::new(ActionKind::StartOfficialGame, "s-ann", Utc::now()),
//! );
//!
//! assert!(state.is_game_started);
//! assert_eq!(state.host_id, Some(0));
//! ```

pub mod state;
pub mod sync;

pub use state::*;
pub use sync::{connect, ClientHandle, Command, MemoryBus, Replica, SyncConfig, View};
