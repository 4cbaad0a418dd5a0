//! The turn engine.
//!
//! [`apply`] is a pure, total function from `(state, action)` to the next
//! state. Inapplicable actions come back as the unchanged input (sometimes
//! with an explanatory `game_message`); nothing here panics or performs I/O.
//! The only clock is the action's own timestamp, so replaying the same
//! action log on any client yields the same state.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use super::action::{Action, ActionKind};
use super::game::{
    GameState, JoinRequest, ENTRY_THRESHOLD, MAX_BARREL_BOLTS, MIN_PLAYERS, OVERTAKE_MIN_TOTAL,
    OVERTAKE_PENALTY, WINNING_TOTAL,
};
use super::player::{Player, ScoreEntry, SlotId};
use super::scoring::{BarrelBand, Scorer, DICE_COUNT};

/// Why an action was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("session already holds a slot")]
    AlreadySeated,
    #[error("join request already pending")]
    AlreadyRequested,
    #[error("sender does not own session {0}")]
    NotSelf(String),
    #[error("only the host may do that")]
    NotHost,
    #[error("it is not the sender's turn")]
    NotYourTurn,
    #[error("no join request from {0}")]
    UnknownRequest(String),
    #[error("no such player")]
    UnknownPlayer,
    #[error("At least 2 players are needed to start.")]
    NotEnoughPlayers,
    #[error("game already started")]
    AlreadyStarted,
    #[error("game is not in progress")]
    GameNotActive,
    #[error("rolling is not allowed now")]
    CannotRoll,
    #[error("malformed roll: {0}")]
    MalformedRoll(String),
    #[error("no dice to act on")]
    NothingOnBoard,
    #[error("die index {0} is out of range")]
    BadIndex(usize),
    #[error("Invalid selection.")]
    InvalidSelection,
    #[error("banking is not allowed now")]
    CannotBank,
    #[error("presence from a session that does not own slot {0}")]
    SpoofedPresence(SlotId),
}

impl Rejection {
    /// Rejections the acting player should see in the game log.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::NotEnoughPlayers | Self::InvalidSelection)
    }
}

/// Apply `action` to `state`.
pub fn apply<S: Scorer + ?Sized>(scorer: &S, state: &GameState, action: &Action) -> GameState {
    match try_apply(scorer, state, action) {
        Ok(next) => next,
        Err(rejection) => {
            if matches!(rejection, Rejection::MalformedRoll(_)) {
                warn!(
                    action = action.kind.as_str(),
                    sender = %action.sender_id,
                    %rejection,
                    "dropping malformed action"
                );
            } else {
                debug!(
                    action = action.kind.as_str(),
                    sender = %action.sender_id,
                    %rejection,
                    "action rejected"
                );
            }
            let mut next = state.clone();
            if rejection.is_user_facing() {
                next.game_message = rejection.to_string();
            }
            next
        }
    }
}

/// Apply `action`, reporting why it was refused.
pub fn try_apply<S: Scorer + ?Sized>(
    scorer: &S,
    state: &GameState,
    action: &Action,
) -> Result<GameState, Rejection> {
    let turn = Turn {
        scorer,
        sender: &action.sender_id,
        now: action.timestamp,
    };

    match &action.kind {
        ActionKind::JoinGame { name, session_id } => turn.join_game(state, name, session_id),
        ActionKind::JoinRequest { name, session_id } => turn.join_request(state, name, session_id),
        ActionKind::ResolveJoinRequest {
            request_session_id,
            accepted,
        } => turn.resolve_join_request(state, request_session_id, *accepted),
        ActionKind::LeaveGame { session_id } => turn.leave_game(state, session_id),
        ActionKind::KickPlayer {
            player_id,
            session_id,
        } => turn.kick_player(state, *player_id, session_id),
        ActionKind::StartOfficialGame => turn.start_official_game(state),
        ActionKind::NewGame => turn.new_game(state),
        ActionKind::RollDice { dice } => turn.roll_dice(state, dice),
        ActionKind::ToggleDieSelection { index } => turn.toggle_die_selection(state, *index),
        ActionKind::KeepDice { indices } => turn.keep_dice(state, indices),
        ActionKind::BankScore => turn.bank_score(state),
        ActionKind::SkipTurn => turn.skip_turn(state),
        ActionKind::PresenceUpdate {
            player_id,
            sender_id,
        } => turn.presence_update(state, *player_id, sender_id),
    }
}

/// Per-action context.
struct Turn<'a, S: ?Sized> {
    scorer: &'a S,
    sender: &'a str,
    now: DateTime<Utc>,
}

impl<'a, S: Scorer + ?Sized> Turn<'a, S> {
    fn require_self(&self, session_id: &str) -> Result<(), Rejection> {
        if self.sender == session_id {
            Ok(())
        } else {
            Err(Rejection::NotSelf(session_id.to_string()))
        }
    }

    fn require_host(&self, state: &GameState) -> Result<(), Rejection> {
        if state.is_host_session(self.sender) {
            Ok(())
        } else {
            Err(Rejection::NotHost)
        }
    }

    fn require_turn(&self, state: &GameState) -> Result<(), Rejection> {
        if !state.is_in_progress() {
            return Err(Rejection::GameNotActive);
        }
        if !state.is_current_session(self.sender) {
            return Err(Rejection::NotYourTurn);
        }
        Ok(())
    }

    // --- Membership ---

    fn join_game(
        &self,
        state: &GameState,
        name: &str,
        session_id: &str,
    ) -> Result<GameState, Rejection> {
        self.require_self(session_id)?;
        if state.slot_of(session_id).is_some() {
            return Err(Rejection::AlreadySeated);
        }

        let mut next = state.clone();
        next.forget_bystander(session_id);
        match self.seat(&mut next, name, session_id) {
            Some(_) => next.game_message = format!("{name} joined."),
            None => {
                next.add_spectator(name, session_id);
                next.game_message = format!("{name} is watching.");
            }
        }
        Ok(next)
    }

    fn join_request(
        &self,
        state: &GameState,
        name: &str,
        session_id: &str,
    ) -> Result<GameState, Rejection> {
        self.require_self(session_id)?;
        if state.slot_of(session_id).is_some() {
            return Err(Rejection::AlreadySeated);
        }
        if state.has_join_request(session_id) {
            return Err(Rejection::AlreadyRequested);
        }

        let mut next = state.clone();
        next.spectators.retain(|s| s.session_id != session_id);
        next.join_requests.push(JoinRequest {
            name: name.to_string(),
            session_id: session_id.to_string(),
            timestamp: self.now,
        });
        next.game_message = format!("{name} wants to join.");
        Ok(next)
    }

    fn resolve_join_request(
        &self,
        state: &GameState,
        request_session_id: &str,
        accepted: bool,
    ) -> Result<GameState, Rejection> {
        self.require_host(state)?;
        let request = state
            .join_requests
            .iter()
            .find(|r| r.session_id == request_session_id)
            .cloned()
            .ok_or_else(|| Rejection::UnknownRequest(request_session_id.to_string()))?;

        let mut next = state.clone();
        next.forget_bystander(request_session_id);

        if accepted && next.slot_of(request_session_id).is_none() {
            if self.seat(&mut next, &request.name, request_session_id).is_some() {
                next.game_message = format!("{} joined.", request.name);
            } else {
                next.add_spectator(&request.name, request_session_id);
                next.game_message = format!("No free slot for {}.", request.name);
            }
        } else if !accepted {
            next.add_spectator(&request.name, request_session_id);
            next.game_message = format!("The host declined {}.", request.name);
        }
        Ok(next)
    }

    fn leave_game(&self, state: &GameState, session_id: &str) -> Result<GameState, Rejection> {
        self.require_self(session_id)?;

        if state.is_spectator(session_id) || state.has_join_request(session_id) {
            let mut next = state.clone();
            next.forget_bystander(session_id);
            return Ok(next);
        }

        let slot = state.slot_of(session_id).ok_or(Rejection::UnknownPlayer)?;
        let leaving = &state.players[slot];
        let total = self.scorer.total_score(leaving);

        let mut next = state.clone();
        if total != 0 {
            next.leavers.insert(leaving.name.clone(), total);
        }
        next.players[slot] = Player::unclaimed(slot);
        self.after_departure(state, &mut next, slot, &format!("{} left.", leaving.name));
        Ok(next)
    }

    fn kick_player(
        &self,
        state: &GameState,
        slot: SlotId,
        session_id: &str,
    ) -> Result<GameState, Rejection> {
        self.require_host(state)?;
        let kicked = state
            .players
            .get(slot)
            .filter(|p| p.is_claimed && p.is_bound_to(session_id))
            .ok_or(Rejection::UnknownPlayer)?;

        let mut next = state.clone();
        next.players[slot] = Player::unclaimed(slot);
        next.add_spectator(&kicked.name, session_id);
        self.after_departure(state, &mut next, slot, &format!("{} was kicked.", kicked.name));
        Ok(next)
    }

    /// Put a session into the first free slot, restoring any preserved score.
    fn seat(&self, next: &mut GameState, name: &str, session_id: &str) -> Option<SlotId> {
        let slot = next.first_free_slot()?;
        let restored = next.leavers.remove(name).unwrap_or(0);
        next.players[slot].claim(name, session_id, restored, self.now);

        if next.host_id.is_none() {
            next.host_id = Some(self.scorer.find_next_host(&next.players).unwrap_or(slot));
        }
        Some(slot)
    }

    /// Fix up host, turn and game-over after `slot` was vacated.
    fn after_departure(&self, prev: &GameState, next: &mut GameState, slot: SlotId, message: &str) {
        let host_valid = next
            .host()
            .is_some_and(|h| h.is_active() && h.status.can_host());
        if !host_valid {
            next.host_id = self.scorer.find_next_host(&next.players);
        }

        if prev.is_in_progress() && next.active_player_count() < MIN_PLAYERS {
            next.is_game_over = true;
            next.clear_turn_progress();
            next.game_message = "Not enough players left, the game is over.".to_string();
        } else if prev.current_player_index == slot {
            let successor = next.next_active_player(slot);
            if prev.is_in_progress() {
                next.begin_turn(successor, self.now);
                let name = &next.players[successor].name;
                next.game_message = format!("{message} {name}'s turn.");
            } else {
                next.current_player_index = successor;
                next.game_message = message.to_string();
            }
        } else {
            next.game_message = message.to_string();
        }
    }

    // --- Game lifecycle ---

    fn start_official_game(&self, state: &GameState) -> Result<GameState, Rejection> {
        self.require_host(state)?;
        if state.is_game_started {
            return Err(Rejection::AlreadyStarted);
        }
        if state.active_player_count() < MIN_PLAYERS {
            return Err(Rejection::NotEnoughPlayers);
        }

        let mut next = state.clone();
        let first = if next.players[next.current_player_index].is_active() {
            next.current_player_index
        } else {
            next.next_active_player(next.current_player_index)
        };
        next.is_game_started = true;
        next.begin_turn(first, self.now);
        let player = &next.players[first];
        next.game_message = format!("The game is on! {}'s turn.{}", player.name, self.hint(player));
        Ok(next)
    }

    fn new_game(&self, state: &GameState) -> Result<GameState, Rejection> {
        self.require_host(state)?;

        let mut next = GameState::initial();
        next.players = state
            .players
            .iter()
            .enumerate()
            .map(|(slot, p)| {
                if p.is_active() {
                    let mut kept = p.clone();
                    kept.reset_for_new_game();
                    kept
                } else {
                    Player::unclaimed(slot)
                }
            })
            .collect();
        next.spectators = state.spectators.clone();
        next.join_requests = state.join_requests.clone();
        next.leavers = state.leavers.clone();
        next.host_id = state.host_id;
        next.version = state.version;
        next.sender_id = state.sender_id.clone();
        next.current_player_index = match state.host_id {
            Some(host) if next.players.get(host).is_some_and(Player::is_active) => host,
            _ => next.players.iter().position(Player::is_active).unwrap_or(0),
        };
        next.turn_start_time = Some(self.now);
        next.game_message = if next.active_player_count() < MIN_PLAYERS {
            "A new game was created. Waiting for players...".to_string()
        } else {
            "New game! Waiting for the host to start.".to_string()
        };
        Ok(next)
    }

    // --- Turn actions ---

    fn roll_dice(&self, state: &GameState, dice: &[u8]) -> Result<GameState, Rejection> {
        self.require_turn(state)?;
        if !state.can_roll {
            return Err(Rejection::CannotRoll);
        }
        let expected = state.dice_to_roll();
        if dice.len() != expected {
            return Err(Rejection::MalformedRoll(format!(
                "expected {expected} dice, got {}",
                dice.len()
            )));
        }
        if let Some(bad) = dice.iter().find(|f| !(1..=6).contains(*f)) {
            return Err(Rejection::MalformedRoll(format!("face {bad} is not a die face")));
        }

        let rolled: i32 = self.scorer.analyze_dice(dice).iter().map(|g| g.score).sum();
        let mut next = state.clone();

        if rolled == 0 {
            let name = state.players[state.current_player_index].name.clone();
            self.end_with_bolt(&mut next, true);
            next.dice_on_board = dice.to_vec();
            let up = &next.players[next.current_player_index];
            next.game_message = format!("{name} bolts! {}'s turn.{}", up.name, self.hint(up));
            return Ok(next);
        }

        if state.kept_dice_this_turn.len() >= DICE_COUNT {
            next.kept_dice_this_turn.clear();
        }
        next.dice_on_board = dice.to_vec();
        next.dice_kept_from_this_roll.clear();
        next.score_from_previous_rolls = state.current_turn_score;
        next.selected_dice_indices.clear();
        next.potential_score = 0;
        next.can_roll = false;
        next.can_bank = true;
        next.can_keep = false;
        next.game_message = format!("{} rolls...", state.players[state.current_player_index].name);
        Ok(next)
    }

    fn toggle_die_selection(
        &self,
        state: &GameState,
        index: usize,
    ) -> Result<GameState, Rejection> {
        self.require_turn(state)?;
        // A turn that has not rolled yet may still show the last player's dice.
        if state.dice_on_board.is_empty() || !state.can_bank {
            return Err(Rejection::NothingOnBoard);
        }
        if index >= state.dice_on_board.len() {
            return Err(Rejection::BadIndex(index));
        }

        let mut selected = state.selected_dice_indices.clone();
        if let Some(pos) = selected.iter().position(|&i| i == index) {
            selected.remove(pos);
        } else {
            selected.push(index);
        }

        let faces: Vec<u8> = selected.iter().map(|&i| state.dice_on_board[i]).collect();
        let mut selection = self.scorer.validate_selection(&faces);
        if !selection.is_valid && !faces.is_empty() {
            let combined = [state.dice_kept_from_this_roll.as_slice(), faces.as_slice()].concat();
            let joint = self.scorer.validate_selection(&combined);
            if joint.is_valid {
                let already = self
                    .scorer
                    .validate_selection(&state.dice_kept_from_this_roll)
                    .score;
                selection.is_valid = true;
                selection.score = joint.score - already;
            }
        }

        let mut next = state.clone();
        next.selected_dice_indices = selected;
        next.can_keep = selection.is_valid;
        next.potential_score = if selection.is_valid { selection.score.max(0) } else { 0 };
        next.game_message = if selection.is_valid {
            format!("Selected +{}.", next.potential_score)
        } else {
            "Pick a scoring combination.".to_string()
        };
        Ok(next)
    }

    fn keep_dice(&self, state: &GameState, indices: &[usize]) -> Result<GameState, Rejection> {
        self.require_turn(state)?;
        if state.dice_on_board.is_empty() || !state.can_bank || indices.is_empty() {
            return Err(Rejection::NothingOnBoard);
        }
        for (n, &i) in indices.iter().enumerate() {
            if i >= state.dice_on_board.len() || indices[..n].contains(&i) {
                return Err(Rejection::BadIndex(i));
            }
        }

        let picked: Vec<u8> = indices.iter().map(|&i| state.dice_on_board[i]).collect();
        let combined = [state.dice_kept_from_this_roll.as_slice(), picked.as_slice()].concat();
        let selection = self.scorer.validate_selection(&combined);
        if !selection.is_valid {
            return Err(Rejection::InvalidSelection);
        }

        let turn_score = state.score_from_previous_rolls + selection.score;
        let added = turn_score - state.current_turn_score;
        let board: Vec<u8> = state
            .dice_on_board
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, &f)| f)
            .collect();
        let hot_dice = board.is_empty();

        let mut next = state.clone();
        next.current_turn_score = turn_score;
        next.kept_dice_this_turn.extend_from_slice(&picked);
        next.dice_kept_from_this_roll = if hot_dice { Vec::new() } else { combined };
        next.dice_on_board = board;
        next.selected_dice_indices.clear();
        next.potential_score = 0;
        next.can_roll = true;
        next.can_bank = true;
        next.can_keep = false;
        next.game_message = if hot_dice {
            format!("+{added}! Turn score: {turn_score}. All dice scored!")
        } else {
            format!("+{added}! Turn score: {turn_score}. Roll again or bank.")
        };
        Ok(next)
    }

    fn bank_score(&self, state: &GameState) -> Result<GameState, Rejection> {
        self.require_turn(state)?;
        if !state.can_bank {
            return Err(Rejection::CannotBank);
        }

        let faces: Vec<u8> = state
            .selected_dice_indices
            .iter()
            .filter_map(|&i| state.dice_on_board.get(i).copied())
            .collect();
        let combined = [state.dice_kept_from_this_roll.as_slice(), faces.as_slice()].concat();
        let selection = self.scorer.validate_selection(&combined);
        let banked = if !faces.is_empty() && selection.is_valid {
            state.score_from_previous_rolls + selection.score
        } else {
            state.current_turn_score + state.potential_score
        };

        let slot = state.current_player_index;
        let banker = &state.players[slot];
        let mut next = state.clone();

        if banked == 0 {
            self.end_with_bolt(&mut next, true);
            let up = &next.players[next.current_player_index];
            next.game_message =
                format!("{} bolts. {}'s turn.{}", banker.name, up.name, self.hint(up));
            return Ok(next);
        }

        if !banker.has_entered_game && banked < ENTRY_THRESHOLD {
            self.end_with_bolt(&mut next, true);
            let up = &next.players[next.current_player_index];
            next.game_message = format!(
                "{} did not reach {ENTRY_THRESHOLD} to enter. Bolt! {}'s turn.{}",
                banker.name,
                up.name,
                self.hint(up)
            );
            return Ok(next);
        }

        let total_before = self.scorer.total_score(banker);
        if let Some(band) = self.scorer.barrel_status(banker) {
            if total_before + banked < band.clearing_total() {
                self.end_with_bolt(&mut next, true);
                let up = &next.players[next.current_player_index];
                next.game_message = format!(
                    "{} stays on the {} barrel. Bolt! {}'s turn.{}",
                    banker.name,
                    band.as_str(),
                    up.name,
                    self.hint(up)
                );
                return Ok(next);
            }
        }

        {
            let p = &mut next.players[slot];
            p.scores.push(ScoreEntry::Points(banked));
            p.has_entered_game = true;
            p.barrel_bolts = 0;
            p.just_reset_from_barrel = false;
        }
        let new_total = total_before + banked;
        let new_band = BarrelBand::for_total(new_total);

        let mut penalties = Vec::new();
        for (i, before) in state.players.iter().enumerate() {
            if i == slot || !before.is_active() {
                continue;
            }
            let old_total = self.scorer.total_score(before);
            let other = &mut next.players[i];

            if new_band.is_some() && self.scorer.barrel_status(before) == new_band {
                if let Some(band) = new_band {
                    other.scores.push(ScoreEntry::Points(band.forfeit_target() - old_total));
                    other.barrel_bolts = 0;
                    other.just_reset_from_barrel = true;
                    penalties.push(format!("{} is knocked off the barrel.", other.name));
                }
                continue;
            }

            let overtaken = total_before < old_total && new_total >= old_total;
            if overtaken && old_total >= OVERTAKE_MIN_TOTAL {
                let lands_on_barrel = BarrelBand::for_total(old_total - OVERTAKE_PENALTY).is_some();
                if !lands_on_barrel && !before.just_reset_from_barrel {
                    other.scores.push(ScoreEntry::Points(-OVERTAKE_PENALTY));
                    penalties.push(format!("{} takes a -{OVERTAKE_PENALTY} penalty.", other.name));
                }
            }
        }

        if new_total >= WINNING_TOTAL {
            next.clear_turn_progress();
            next.dice_on_board.clear();
            next.is_game_over = true;
            next.game_message = format!("{} wins with {new_total}!", banker.name);
            return Ok(next);
        }

        let up_slot = next.next_active_player(slot);
        next.begin_turn(up_slot, self.now);
        let up = &next.players[up_slot];
        let mut message = format!("{} banked {banked}.", banker.name);
        for penalty in &penalties {
            message.push(' ');
            message.push_str(penalty);
        }
        message.push_str(&format!(" {}'s turn.{}", up.name, self.hint(up)));
        next.game_message = message;
        Ok(next)
    }

    fn skip_turn(&self, state: &GameState) -> Result<GameState, Rejection> {
        if !state.is_in_progress() {
            return Err(Rejection::GameNotActive);
        }

        let name = state.players[state.current_player_index].name.clone();
        let mut next = state.clone();
        self.end_with_bolt(&mut next, false);
        let up = &next.players[next.current_player_index];
        next.game_message = format!("{name} skipped a turn. {}'s turn.", up.name);
        Ok(next)
    }

    fn presence_update(
        &self,
        state: &GameState,
        slot: SlotId,
        sender_id: &str,
    ) -> Result<GameState, Rejection> {
        match state.players.get(slot) {
            Some(p) if p.is_claimed && p.is_bound_to(sender_id) => {
                let mut next = state.clone();
                next.players[slot].last_seen = Some(self.now);
                Ok(next)
            }
            _ => Err(Rejection::SpoofedPresence(slot)),
        }
    }

    /// Record a bolt for the active player and pass the turn.
    ///
    /// With `count_barrel`, a bolt on a barrel counts toward the forced
    /// exit; the third one pushes the player back to the band's target.
    fn end_with_bolt(&self, next: &mut GameState, count_barrel: bool) {
        let slot = next.current_player_index;
        let band = self.scorer.barrel_status(&next.players[slot]);
        let total = self.scorer.total_score(&next.players[slot]);

        let player = &mut next.players[slot];
        player.scores.push(ScoreEntry::Bolt);
        player.just_reset_from_barrel = false;
        if let (true, Some(band)) = (count_barrel, band) {
            player.barrel_bolts += 1;
            if player.barrel_bolts >= MAX_BARREL_BOLTS {
                player.scores.push(ScoreEntry::Points(band.forfeit_target() - total));
                player.barrel_bolts = 0;
                player.just_reset_from_barrel = true;
            }
        }

        let up = next.next_active_player(slot);
        next.begin_turn(up, self.now);
    }

    fn hint(&self, player: &Player) -> String {
        if !player.has_entered_game {
            format!(" Needs {ENTRY_THRESHOLD}+ to enter.")
        } else if let Some(band) = self.scorer.barrel_status(player) {
            format!(" On the {} barrel.", band.as_str())
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::player::PlayerStatus;
    use crate::state::scoring::{ScoringGroup, Selection, ThousandScorer};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const ANN: &str = "s-ann";
    const BOB: &str = "s-bob";
    const CAT: &str = "s-cat";

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn act(state: &GameState, kind: ActionKind, sender: &str) -> GameState {
        apply(&ThousandScorer, state, &Action::new(kind, sender, at()))
    }

    fn join(state: &GameState, name: &str, session: &str) -> GameState {
        act(
            state,
            ActionKind::JoinGame {
                name: name.to_string(),
                session_id: session.to_string(),
            },
            session,
        )
    }

    fn started(names: &[(&str, &str)]) -> GameState {
        let mut state = GameState::initial();
        for (name, session) in names {
            state = join(&state, name, session);
        }
        act(&state, ActionKind::StartOfficialGame, names[0].1)
    }

    fn two_player_game() -> GameState {
        started(&[("Ann", ANN), ("Bob", BOB)])
    }

    fn roll(state: &GameState, dice: &[u8], sender: &str) -> GameState {
        act(state, ActionKind::RollDice { dice: dice.to_vec() }, sender)
    }

    /// Lets any non-empty selection of at most three dice score 10 per die.
    struct LenientScorer;

    impl Scorer for LenientScorer {
        fn analyze_dice(&self, faces: &[u8]) -> Vec<ScoringGroup> {
            ThousandScorer.analyze_dice(faces)
        }

        fn validate_selection(&self, faces: &[u8]) -> Selection {
            match faces.len() {
                3 => Selection::valid(30),
                _ => Selection::invalid(),
            }
        }
    }

    #[test]
    fn test_two_players_join_and_start() {
        let state = join(&GameState::initial(), "Ann", ANN);
        assert_eq!(state.slot_of(ANN), Some(0));
        assert_eq!(state.host_id, Some(0));

        let state = join(&state, "Bob", BOB);
        assert_eq!(state.slot_of(BOB), Some(1));
        assert_eq!(state.host_id, Some(0));

        let state = act(&state, ActionKind::StartOfficialGame, ANN);
        assert!(state.is_game_started);
        assert_eq!(state.current_player_index, 0);
        assert!(state.can_roll);
    }

    #[test]
    fn test_join_twice_is_rejected() {
        let state = join(&GameState::initial(), "Ann", ANN);
        let again = join(&state, "Ann", ANN);
        assert_eq!(again, state);
    }

    #[test]
    fn test_join_for_someone_else_is_rejected() {
        let state = GameState::initial();
        let next = act(
            &state,
            ActionKind::JoinGame {
                name: "Bob".into(),
                session_id: BOB.into(),
            },
            ANN,
        );
        assert_eq!(next, state);
    }

    #[test]
    fn test_join_full_room_spectates() {
        let mut state = GameState::initial();
        for i in 0..5 {
            state = join(&state, &format!("P{i}"), &format!("s{i}"));
        }
        let state = join(&state, "Late", "s-late");
        assert!(state.slot_of("s-late").is_none());
        assert!(state.is_spectator("s-late"));
    }

    #[test]
    fn test_rejoin_restores_leaver_score() {
        let mut state = two_player_game();
        state.players[1].scores = vec![ScoreEntry::Points(120), ScoreEntry::Bolt];
        let state = act(&state, ActionKind::LeaveGame { session_id: BOB.into() }, BOB);
        assert_eq!(state.leavers.get("Bob"), Some(&120));

        let state = join(&state, "Bob", "s-bob-2");
        let bob = &state.players[state.slot_of("s-bob-2").unwrap()];
        assert_eq!(bob.scores, vec![ScoreEntry::Points(120)]);
        assert!(bob.has_entered_game);
        assert!(state.leavers.is_empty());
    }

    #[test]
    fn test_join_request_is_idempotent() {
        let state = two_player_game();
        let request = ActionKind::JoinRequest {
            name: "Cat".into(),
            session_id: CAT.into(),
        };
        let once = act(&state, request.clone(), CAT);
        let twice = act(&once, request, CAT);
        assert_eq!(once.join_requests.len(), 1);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_spectator_request_accepted_takes_free_slot() {
        let mut state = two_player_game();
        state.add_spectator("Cat", CAT);

        let state = act(
            &state,
            ActionKind::JoinRequest {
                name: "Cat".into(),
                session_id: CAT.into(),
            },
            CAT,
        );
        assert!(state.has_join_request(CAT));
        assert!(!state.is_spectator(CAT));

        let state = act(
            &state,
            ActionKind::ResolveJoinRequest {
                request_session_id: CAT.into(),
                accepted: true,
            },
            ANN,
        );
        assert!(state.join_requests.is_empty());
        assert_eq!(state.slot_of(CAT), Some(2));
        assert!(!state.is_spectator(CAT));
    }

    #[test]
    fn test_denied_request_spectates() {
        let state = two_player_game();
        let state = act(
            &state,
            ActionKind::JoinRequest {
                name: "Cat".into(),
                session_id: CAT.into(),
            },
            CAT,
        );
        let state = act(
            &state,
            ActionKind::ResolveJoinRequest {
                request_session_id: CAT.into(),
                accepted: false,
            },
            ANN,
        );
        assert!(state.join_requests.is_empty());
        assert!(state.is_spectator(CAT));
        assert!(state.slot_of(CAT).is_none());
    }

    #[test]
    fn test_only_host_resolves_requests() {
        let state = two_player_game();
        let state = act(
            &state,
            ActionKind::JoinRequest {
                name: "Cat".into(),
                session_id: CAT.into(),
            },
            CAT,
        );
        let resolve = Action::new(
            ActionKind::ResolveJoinRequest {
                request_session_id: CAT.into(),
                accepted: true,
            },
            BOB,
            at(),
        );
        assert_eq!(
            try_apply(&ThousandScorer, &state, &resolve),
            Err(Rejection::NotHost)
        );
    }

    #[test]
    fn test_current_player_leaving_passes_turn() {
        let state = started(&[("Ann", ANN), ("Bob", BOB), ("Cat", CAT)]);
        let state = roll(&state, &[1, 2, 3, 4, 6], ANN);
        assert!(!state.dice_on_board.is_empty());

        let state = act(&state, ActionKind::LeaveGame { session_id: ANN.into() }, ANN);
        assert_eq!(state.current_player_index, 1);
        assert!(state.dice_on_board.is_empty());
        assert!(state.can_roll);
        assert!(!state.is_game_over);
        // Ann was host; Bob inherits.
        assert_eq!(state.host_id, Some(1));
    }

    #[test]
    fn test_leaving_below_two_players_ends_game() {
        let state = two_player_game();
        let state = act(&state, ActionKind::LeaveGame { session_id: BOB.into() }, BOB);
        assert!(state.is_game_over);
        assert!(!state.can_roll);
    }

    #[test]
    fn test_spectator_leaves_outright() {
        let mut state = two_player_game();
        state.add_spectator("Cat", CAT);
        let state = act(&state, ActionKind::LeaveGame { session_id: CAT.into() }, CAT);
        assert!(!state.is_spectator(CAT));
    }

    #[test]
    fn test_kick_demotes_without_preserving_score() {
        let mut state = started(&[("Ann", ANN), ("Bob", BOB), ("Cat", CAT)]);
        state.players[2].scores = vec![ScoreEntry::Points(200)];
        let state = act(
            &state,
            ActionKind::KickPlayer {
                player_id: 2,
                session_id: CAT.into(),
            },
            ANN,
        );
        assert!(state.slot_of(CAT).is_none());
        assert!(state.is_spectator(CAT));
        assert!(state.leavers.is_empty());
        assert_eq!(state.players[2].name, "Player 3");
    }

    #[test]
    fn test_start_needs_two_players() {
        let state = join(&GameState::initial(), "Ann", ANN);
        let state = act(&state, ActionKind::StartOfficialGame, ANN);
        assert!(!state.is_game_started);
        assert_eq!(state.game_message, "At least 2 players are needed to start.");
    }

    #[test]
    fn test_roll_then_select_with_external_validator() {
        let state = two_player_game();
        let scorer = LenientScorer;
        let step = |s: &GameState, kind| apply(&scorer, s, &Action::new(kind, ANN, at()));

        let state = step(&state, ActionKind::RollDice { dice: vec![2, 2, 2, 6, 6] });
        assert_eq!(state.dice_on_board, vec![2, 2, 2, 6, 6]);
        assert!(!state.can_roll);
        assert!(state.can_bank);

        let state = step(&state, ActionKind::ToggleDieSelection { index: 3 });
        let state = step(&state, ActionKind::ToggleDieSelection { index: 4 });
        assert!(!state.can_keep);

        let state = step(&state, ActionKind::ToggleDieSelection { index: 0 });
        assert!(state.can_keep);
        assert_eq!(state.potential_score, 30);
        assert_eq!(state.selected_dice_indices, vec![3, 4, 0]);
    }

    #[test]
    fn test_keep_and_hot_dice() {
        let state = two_player_game();
        let state = roll(&state, &[1, 1, 1, 5, 5], ANN);
        let state = act(&state, ActionKind::KeepDice { indices: vec![0, 1, 2] }, ANN);
        assert_eq!(state.current_turn_score, 100);
        assert_eq!(state.dice_on_board, vec![5, 5]);
        assert_eq!(state.dice_to_roll(), 2);

        let state = act(&state, ActionKind::KeepDice { indices: vec![0, 1] }, ANN);
        assert_eq!(state.current_turn_score, 110);
        assert!(state.dice_on_board.is_empty());
        assert!(state.dice_kept_from_this_roll.is_empty());
        assert_eq!(state.dice_to_roll(), 5);

        let state = roll(&state, &[5, 2, 3, 4, 6], ANN);
        assert!(state.kept_dice_this_turn.is_empty());
        assert_eq!(state.score_from_previous_rolls, 110);
    }

    #[test]
    fn test_toggle_after_keep_on_same_roll() {
        let state = two_player_game();
        let state = roll(&state, &[1, 5, 2, 3, 6], ANN);
        let state = act(&state, ActionKind::KeepDice { indices: vec![0] }, ANN);
        assert_eq!(state.dice_on_board, vec![5, 2, 3, 6]);
        assert!(state.can_roll);

        let state = act(&state, ActionKind::ToggleDieSelection { index: 0 }, ANN);
        assert_eq!(state.selected_dice_indices, vec![0]);
        assert!(state.can_keep);
        assert_eq!(state.potential_score, 5);

        let state = act(&state, ActionKind::KeepDice { indices: vec![0] }, ANN);
        assert_eq!(state.current_turn_score, 15);
        assert_eq!(state.dice_on_board, vec![2, 3, 6]);
    }

    #[test]
    fn test_selection_combines_with_dice_kept_this_roll() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(100)];
        state.players[0].has_entered_game = true;

        let state = roll(&state, &[2, 2, 2, 2, 3], ANN);
        let state = act(&state, ActionKind::KeepDice { indices: vec![0, 1, 2] }, ANN);
        assert_eq!(state.current_turn_score, 20);
        assert_eq!(state.dice_kept_from_this_roll, vec![2, 2, 2]);

        // A lone 2 only scores as the fourth of a kind.
        let state = act(&state, ActionKind::ToggleDieSelection { index: 0 }, ANN);
        assert!(state.can_keep);
        assert_eq!(state.potential_score, 20);

        let state = act(&state, ActionKind::BankScore, ANN);
        assert_eq!(
            state.players[0].scores,
            vec![ScoreEntry::Points(100), ScoreEntry::Points(40)]
        );
        assert_eq!(state.current_player_index, 1);
    }

    #[test]
    fn test_toggle_before_first_roll_is_rejected() {
        let state = two_player_game();
        let state = roll(&state, &[2, 3, 4, 6, 6], ANN);
        assert_eq!(state.current_player_index, 1);
        assert!(!state.dice_on_board.is_empty());

        let next = act(&state, ActionKind::ToggleDieSelection { index: 0 }, BOB);
        assert_eq!(next, state);
    }

    #[test]
    fn test_invalid_keep_only_updates_message() {
        let state = two_player_game();
        let state = roll(&state, &[1, 2, 3, 4, 6], ANN);
        let next = act(&state, ActionKind::KeepDice { indices: vec![1] }, ANN);

        let mut expected = state.clone();
        expected.game_message = "Invalid selection.".to_string();
        assert_eq!(next, expected);
    }

    #[test]
    fn test_malformed_roll_is_dropped() {
        let state = two_player_game();
        assert_eq!(roll(&state, &[1, 2], ANN), state);
        assert_eq!(roll(&state, &[1, 2, 3, 4, 9], ANN), state);
    }

    #[test]
    fn test_roll_out_of_turn_is_rejected() {
        let state = two_player_game();
        assert_eq!(roll(&state, &[1, 1, 1, 1, 1], BOB), state);
    }

    #[test]
    fn test_bolt_roll_records_one_marker_and_advances() {
        let state = two_player_game();
        let state = roll(&state, &[2, 3, 4, 6, 6], ANN);

        assert_eq!(state.players[0].scores, vec![ScoreEntry::Bolt]);
        assert_eq!(state.current_player_index, 1);
        assert!(state.can_roll);
        assert_eq!(state.dice_on_board, vec![2, 3, 4, 6, 6]);
    }

    #[test]
    fn test_third_barrel_bolt_forfeits() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(250)];
        state.players[0].has_entered_game = true;
        state.players[0].barrel_bolts = 2;

        let state = roll(&state, &[2, 3, 4, 6, 6], ANN);
        let ann = &state.players[0];
        assert_eq!(
            ann.scores,
            vec![ScoreEntry::Points(250), ScoreEntry::Bolt, ScoreEntry::Points(-100)]
        );
        assert_eq!(ann.barrel_bolts, 0);
        assert!(ann.just_reset_from_barrel);
        assert_eq!(ThousandScorer.total_score(ann), 150);
    }

    #[test]
    fn test_entry_not_reached_is_bolt() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(180)];
        let state = roll(&state, &[1, 5, 5, 5, 2], ANN);
        let state = act(&state, ActionKind::KeepDice { indices: vec![0, 1, 2, 3] }, ANN);
        // 10 + 50
        assert_eq!(state.current_turn_score, 60);

        let mut state = state;
        state.current_turn_score = 40;
        let state = act(&state, ActionKind::BankScore, ANN);
        let ann = &state.players[0];
        assert_eq!(ann.scores.last(), Some(&ScoreEntry::Bolt));
        assert!(!ann.has_entered_game);
        assert_eq!(state.current_player_index, 1);
    }

    #[test]
    fn test_bank_enters_and_advances() {
        let state = two_player_game();
        let state = roll(&state, &[1, 1, 1, 2, 3], ANN);
        let state = act(&state, ActionKind::ToggleDieSelection { index: 0 }, ANN);
        let state = act(&state, ActionKind::ToggleDieSelection { index: 1 }, ANN);
        let state = act(&state, ActionKind::ToggleDieSelection { index: 2 }, ANN);
        assert_eq!(state.potential_score, 100);

        let state = act(&state, ActionKind::BankScore, ANN);
        let ann = &state.players[0];
        assert_eq!(ann.scores, vec![ScoreEntry::Points(100)]);
        assert!(ann.has_entered_game);
        assert_eq!(state.current_player_index, 1);
        assert_eq!(state.current_turn_score, 0);
    }

    #[test]
    fn test_failing_to_clear_barrel_is_bolt() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(250)];
        state.players[0].has_entered_game = true;
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 30;

        let state = act(&state, ActionKind::BankScore, ANN);
        let ann = &state.players[0];
        assert_eq!(ann.scores.last(), Some(&ScoreEntry::Bolt));
        assert_eq!(ann.barrel_bolts, 1);
    }

    #[test]
    fn test_overtake_penalty() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(350)];
        state.players[0].has_entered_game = true;
        state.players[1].scores = vec![ScoreEntry::Points(400)];
        state.players[1].has_entered_game = true;
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 100;

        let state = act(&state, ActionKind::BankScore, ANN);
        assert_eq!(
            state.players[1].scores,
            vec![ScoreEntry::Points(400), ScoreEntry::Points(-50)]
        );
    }

    #[test]
    fn test_no_overtake_penalty_onto_barrel() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(100)];
        state.players[0].has_entered_game = true;
        state.players[1].scores = vec![ScoreEntry::Points(320)];
        state.players[1].has_entered_game = true;
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 250;

        let state = act(&state, ActionKind::BankScore, ANN);
        assert_eq!(state.players[1].scores, vec![ScoreEntry::Points(320)]);
    }

    #[test]
    fn test_landing_on_occupied_barrel_knocks_off() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(150)];
        state.players[0].has_entered_game = true;
        state.players[1].scores = vec![ScoreEntry::Points(250)];
        state.players[1].has_entered_game = true;
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 80;

        let state = act(&state, ActionKind::BankScore, ANN);
        let bob = &state.players[1];
        assert_eq!(bob.scores, vec![ScoreEntry::Points(250), ScoreEntry::Points(-100)]);
        assert!(bob.just_reset_from_barrel);
        assert_eq!(ThousandScorer.total_score(&state.players[0]), 230);
    }

    #[test]
    fn test_knocked_off_player_skips_overtake_penalty_until_their_turn() {
        let mut state = started(&[("Ann", ANN), ("Cat", CAT), ("Bob", BOB)]);
        for (slot, total) in [(0, 690), (1, 600), (2, 750)] {
            state.players[slot].scores = vec![ScoreEntry::Points(total)];
            state.players[slot].has_entered_game = true;
        }
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 60;

        let mut state = act(&state, ActionKind::BankScore, ANN);
        assert_eq!(ThousandScorer.total_score(&state.players[2]), 650);
        assert!(state.players[2].just_reset_from_barrel);
        assert_eq!(state.current_player_index, 1);

        // Cat passes Bob's 650 before Bob has played again.
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 60;
        let state = act(&state, ActionKind::BankScore, CAT);
        assert_eq!(ThousandScorer.total_score(&state.players[1]), 660);
        assert_eq!(
            state.players[2].scores,
            vec![ScoreEntry::Points(750), ScoreEntry::Points(-100)]
        );
        assert_eq!(state.current_player_index, 2);

        let state = roll(&state, &[2, 3, 4, 6, 6], BOB);
        assert!(!state.players[2].just_reset_from_barrel);
    }

    #[test]
    fn test_win_ends_game() {
        let mut state = two_player_game();
        state.players[0].scores = vec![ScoreEntry::Points(950)];
        state.players[0].has_entered_game = true;
        state.can_roll = false;
        state.can_bank = true;
        state.current_turn_score = 60;

        let state = act(&state, ActionKind::BankScore, ANN);
        assert!(state.is_game_over);
        assert_eq!(state.current_player_index, 0);
        assert!(!state.can_roll);
        assert_eq!(ThousandScorer.total_score(&state.players[0]), 1010);

        let after = roll(&state, &[1, 1, 1, 1, 1], ANN);
        assert_eq!(after, state);
    }

    #[test]
    fn test_skip_turn() {
        let state = two_player_game();
        let state = act(&state, ActionKind::SkipTurn, BOB);
        assert_eq!(state.players[0].scores, vec![ScoreEntry::Bolt]);
        assert_eq!(state.current_player_index, 1);
    }

    #[test]
    fn test_presence_requires_matching_session() {
        let state = two_player_game();
        let later = Utc.timestamp_millis_opt(1_700_000_060_000).unwrap();

        let spoofed = Action::new(
            ActionKind::PresenceUpdate {
                player_id: 0,
                sender_id: BOB.into(),
            },
            BOB,
            later,
        );
        assert_eq!(apply(&ThousandScorer, &state, &spoofed), state);

        let genuine = Action::new(
            ActionKind::PresenceUpdate {
                player_id: 0,
                sender_id: ANN.into(),
            },
            ANN,
            later,
        );
        let next = apply(&ThousandScorer, &state, &genuine);
        assert_eq!(next.players[0].last_seen, Some(later));
    }

    #[test]
    fn test_new_game_keeps_identities() {
        let mut state = started(&[("Ann", ANN), ("Bob", BOB)]);
        state.players[0].scores = vec![ScoreEntry::Points(1000)];
        state.players[0].status = PlayerStatus::Away;
        state.is_game_over = true;
        state.add_spectator("Cat", CAT);
        state.leavers.insert("Dan".into(), 90);
        state.version = 7;

        let next = act(&state, ActionKind::NewGame, ANN);
        assert!(!next.is_game_started);
        assert!(!next.is_game_over);
        assert_eq!(next.slot_of(ANN), Some(0));
        assert_eq!(next.slot_of(BOB), Some(1));
        assert!(next.players[0].scores.is_empty());
        assert_eq!(next.players[0].status, PlayerStatus::Away);
        assert_eq!(next.host_id, Some(0));
        assert!(next.is_spectator(CAT));
        assert_eq!(next.leavers.get("Dan"), Some(&90));
        assert_eq!(next.version, 7);
        assert_eq!(next.players[2].name, "Player 3");
    }

    #[test]
    fn test_random_play_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let sessions = [ANN, BOB, CAT];
        let mut state = started(&[("Ann", ANN), ("Bob", BOB), ("Cat", CAT)]);

        for _ in 0..2_000 {
            let before = state.clone();
            let sender = sessions[state.current_player_index];

            let kind = if state.is_game_over {
                ActionKind::NewGame
            } else if !state.is_game_started {
                ActionKind::StartOfficialGame
            } else if state.can_roll && (!state.can_bank || rng.gen_bool(0.6)) {
                let dice = (0..state.dice_to_roll()).map(|_| rng.gen_range(1..=6)).collect();
                ActionKind::RollDice { dice }
            } else {
                let scoring: Vec<usize> = state
                    .dice_on_board
                    .iter()
                    .enumerate()
                    .filter(|(_, &f)| f == 1 || f == 5)
                    .map(|(i, _)| i)
                    .collect();
                if !state.can_roll && !scoring.is_empty() {
                    ActionKind::KeepDice { indices: scoring }
                } else {
                    ActionKind::BankScore
                }
            };
            let sender = match kind {
                ActionKind::NewGame | ActionKind::StartOfficialGame => ANN,
                _ => sender,
            };

            let resets = matches!(kind, ActionKind::NewGame);
            state = act(&state, kind, sender);

            if state.is_in_progress() {
                assert!(state.players[state.current_player_index].is_active());
            }
            if !resets {
                for (a, b) in before.players.iter().zip(&state.players) {
                    assert!(b.scores.len() >= a.scores.len());
                }
            }
        }
    }
}
