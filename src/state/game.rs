//! The replicated game aggregate.
//!
//! Every client holds a full [`GameState`]. It is never mutated in place by
//! the reducer: each accepted action clones it and returns the edited copy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::player::{Player, SessionId, SlotId};
use super::scoring::DICE_COUNT;

/// Number of player slots in a room.
pub const MAX_PLAYERS: usize = 5;

/// Minimum players to start a game.
pub const MIN_PLAYERS: usize = 2;

/// Points a single bank must reach before a player is "in" the game.
pub const ENTRY_THRESHOLD: i32 = 50;

/// Total that wins the game.
pub const WINNING_TOTAL: i32 = 1000;

/// Penalty for being overtaken.
pub const OVERTAKE_PENALTY: i32 = 50;

/// Totals below this are never penalised for being overtaken.
pub const OVERTAKE_MIN_TOTAL: i32 = 100;

/// Bolts on a barrel before the player is forced off it.
pub const MAX_BARREL_BOLTS: u32 = 3;

/// Someone watching the room without a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spectator {
    pub name: String,
    #[serde(rename = "id")]
    pub session_id: SessionId,
}

/// A pending request to take a slot in a running game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub name: String,
    pub session_id: SessionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Full state of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<Player>,
    #[serde(default)]
    pub spectators: Vec<Spectator>,
    #[serde(default)]
    pub join_requests: Vec<JoinRequest>,
    /// Preserved totals of players who left, by name.
    #[serde(default)]
    pub leavers: BTreeMap<String, i32>,
    pub host_id: Option<SlotId>,
    pub current_player_index: SlotId,

    pub dice_on_board: Vec<u8>,
    pub kept_dice_this_turn: Vec<u8>,
    pub dice_kept_from_this_roll: Vec<u8>,
    pub selected_dice_indices: Vec<usize>,
    pub current_turn_score: i32,
    pub score_from_previous_rolls: i32,
    pub potential_score: i32,
    pub can_roll: bool,
    pub can_bank: bool,
    pub can_keep: bool,

    pub is_game_started: bool,
    pub is_game_over: bool,
    pub game_message: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub turn_start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub sender_id: Option<SessionId>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::initial()
    }
}

impl GameState {
    /// Fresh room: all slots empty, nothing started, version 0.
    pub fn initial() -> Self {
        Self {
            players: (0..MAX_PLAYERS).map(Player::unclaimed).collect(),
            spectators: Vec::new(),
            join_requests: Vec::new(),
            leavers: BTreeMap::new(),
            host_id: None,
            current_player_index: 0,
            dice_on_board: Vec::new(),
            kept_dice_this_turn: Vec::new(),
            dice_kept_from_this_roll: Vec::new(),
            selected_dice_indices: Vec::new(),
            current_turn_score: 0,
            score_from_previous_rolls: 0,
            potential_score: 0,
            can_roll: false,
            can_bank: false,
            can_keep: false,
            is_game_started: false,
            is_game_over: false,
            game_message: String::new(),
            turn_start_time: None,
            version: 0,
            sender_id: None,
        }
    }

    /// Started and not yet over.
    pub fn is_in_progress(&self) -> bool {
        self.is_game_started && !self.is_game_over
    }

    /// Player in `slot`, if the slot exists.
    pub fn player(&self, slot: SlotId) -> Option<&Player> {
        self.players.get(slot)
    }

    /// Player whose turn it is.
    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_player_index)
    }

    /// Player holding the host slot.
    pub fn host(&self) -> Option<&Player> {
        self.host_id.and_then(|id| self.players.get(id))
    }

    /// Slot bound to `session_id`, if any.
    pub fn slot_of(&self, session_id: &str) -> Option<SlotId> {
        self.players
            .iter()
            .position(|p| p.is_claimed && p.is_bound_to(session_id))
    }

    /// Check if `session_id` is watching from the spectator list.
    pub fn is_spectator(&self, session_id: &str) -> bool {
        self.spectators.iter().any(|s| s.session_id == session_id)
    }

    /// Check if `session_id` is waiting on the host to admit it.
    pub fn has_join_request(&self, session_id: &str) -> bool {
        self.join_requests.iter().any(|r| r.session_id == session_id)
    }

    /// Whether `session_id` controls the host slot.
    pub fn is_host_session(&self, session_id: &str) -> bool {
        self.host().is_some_and(|p| p.is_bound_to(session_id))
    }

    /// Whether `session_id` controls the slot whose turn it is.
    pub fn is_current_session(&self, session_id: &str) -> bool {
        self.current_player()
            .is_some_and(|p| p.is_active() && p.is_bound_to(session_id))
    }

    /// Lowest unclaimed slot.
    pub fn first_free_slot(&self) -> Option<SlotId> {
        self.players.iter().position(|p| !p.is_claimed)
    }

    /// Claimed, non-spectator players.
    pub fn active_player_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active()).count()
    }

    /// First active slot strictly after `start`, wrapping around.
    ///
    /// Returns `start` itself when no other slot qualifies.
    pub fn next_active_player(&self, start: SlotId) -> SlotId {
        let len = self.players.len();
        if len == 0 {
            return start;
        }
        (1..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| self.players[i].is_active())
            .unwrap_or(start)
    }

    /// Number of dice the next roll throws.
    pub fn dice_to_roll(&self) -> usize {
        let kept = self.kept_dice_this_turn.len();
        if kept >= DICE_COUNT {
            DICE_COUNT
        } else {
            DICE_COUNT - kept
        }
    }

    /// Drop every turn-scoped field and hand the turn to `slot`.
    pub fn begin_turn(&mut self, slot: SlotId, now: DateTime<Utc>) {
        self.current_player_index = slot;
        self.dice_on_board.clear();
        self.clear_turn_progress();
        self.can_roll = true;
        self.turn_start_time = Some(now);
    }

    /// Zero the accumulators and flags of the current turn.
    pub fn clear_turn_progress(&mut self) {
        self.kept_dice_this_turn.clear();
        self.dice_kept_from_this_roll.clear();
        self.selected_dice_indices.clear();
        self.current_turn_score = 0;
        self.score_from_previous_rolls = 0;
        self.potential_score = 0;
        self.can_roll = false;
        self.can_bank = false;
        self.can_keep = false;
    }

    /// Remove `session_id` from the spectator list and the request queue.
    pub fn forget_bystander(&mut self, session_id: &str) {
        self.spectators.retain(|s| s.session_id != session_id);
        self.join_requests.retain(|r| r.session_id != session_id);
    }

    pub fn add_spectator(&mut self, name: &str, session_id: &str) {
        if !self.is_spectator(session_id) {
            self.spectators.push(Spectator {
                name: name.to_string(),
                session_id: session_id.to_string(),
            });
        }
    }

    /// Bump the version and sign the state as ours before re-broadcast.
    pub fn restamp(&mut self, sender_id: &str) {
        self.version += 1;
        self.sender_id = Some(sender_id.to_string());
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
