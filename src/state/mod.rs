//! Pure game state for the Thousand dice game.
//!
//! - `player` - player slots, score sheets and liveness status
//! - `game` - the room aggregate and turn helpers
//! - `action` - the closed set of actions clients exchange
//! - `scoring` - dice scoring rules behind the [`Scorer`] trait
//! - `reducer` - the pure `(state, action) -> state` function
//!
//! # Turn flow
//!
//! ```text
//!            ┌──────────── bolt (no scoring dice) ─────────────┐
//!            ▼                                                 │
//!   ┌──────────────┐  rollDice  ┌───────────┐  keepDice  ┌─────┴─────┐
//!   │   can roll   │──────────▶ │ must keep │ ─────────▶ │ roll/bank │
//!   └──────────────┘            └─────┬─────┘            └─────┬─────┘
//!            ▲                        │ bankScore              │ bankScore
//!            └────────── next player ◀┴────────────────────────┘
//! ```
//!
//! Nothing in this module performs I/O or reads a clock.

pub mod action;
pub mod game;
pub mod player;
pub mod reducer;
pub mod scoring;

pub use action::{Action, ActionKind};
pub use game::{
    GameState, JoinRequest, Spectator, ENTRY_THRESHOLD, MAX_BARREL_BOLTS, MAX_PLAYERS,
    MIN_PLAYERS, OVERTAKE_MIN_TOTAL, OVERTAKE_PENALTY, WINNING_TOTAL,
};
pub use player::{Player, PlayerStatus, ScoreEntry, SessionId, SlotId, BOLT_MARKER};
pub use reducer::{apply, try_apply, Rejection};
pub use scoring::{BarrelBand, Scorer, ScoringGroup, Selection, ThousandScorer, DICE_COUNT};
