//! One client's copy of the room.
//!
//! A [`Replica`] owns a full [`GameState`] and reconciles it against
//! inbound [`Message`]s. Every method returns the messages the caller should
//! publish; nothing here touches the network or reads a clock.
//!
//! # Bootstrap
//!
//! ```text
//!                 snapshot arrives
//!   ┌──────────┐ ─────────────────▶ ┌────────┐
//!   │ Awaiting │                    │ Synced │
//!   └──────────┘ ─────┐             └────────┘
//!                     │ grace expires    ▲
//!                     ▼                  │ rival v1 snapshot from a
//!                ┌─────────┐             │ lower session id
//!                │ Created │ ────────────┘
//!                └─────────┘
//! ```

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::state::{
    apply, Action, ActionKind, GameState, PlayerStatus, Scorer, SessionId, SlotId, ThousandScorer,
};
use crate::sync::message::{Control, Message, PresencePing};
use crate::sync::presence::{self, Thresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    /// Waiting for a retained snapshot.
    Awaiting { since: DateTime<Utc> },
    /// Holding a snapshot received from someone else.
    Synced,
    /// Created the room after the grace window passed.
    Created,
}

/// What the UI reads back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub game_state: Option<GameState>,
    pub my_player_id: Option<SlotId>,
    pub is_spectator: bool,
}

#[derive(Debug)]
pub struct Replica<S = ThousandScorer> {
    scorer: S,
    session_id: SessionId,
    player_name: String,
    thresholds: Thresholds,
    state: Option<GameState>,
    bootstrap: Bootstrap,
}

impl Replica<ThousandScorer> {
    pub fn new(
        session_id: impl Into<SessionId>,
        player_name: impl Into<String>,
        thresholds: Thresholds,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_scorer(ThousandScorer, session_id, player_name, thresholds, now)
    }
}

impl<S: Scorer> Replica<S> {
    pub fn with_scorer(
        scorer: S,
        session_id: impl Into<SessionId>,
        player_name: impl Into<String>,
        thresholds: Thresholds,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            scorer,
            session_id: session_id.into(),
            player_name: player_name.into(),
            thresholds,
            state: None,
            bootstrap: Bootstrap::Awaiting { since: now },
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn bootstrap(&self) -> Bootstrap {
        self.bootstrap
    }

    pub fn my_slot(&self) -> Option<SlotId> {
        self.state.as_ref()?.slot_of(&self.session_id)
    }

    pub fn is_host(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.is_host_session(&self.session_id))
    }

    pub fn view(&self) -> View {
        View {
            game_state: self.state.clone(),
            my_player_id: self.my_slot(),
            is_spectator: self
                .state
                .as_ref()
                .is_some_and(|s| s.is_spectator(&self.session_id)),
        }
    }

    /// Reconcile one inbound message.
    pub fn handle(&mut self, message: Message, now: DateTime<Utc>) -> Vec<Message> {
        if message.sender_id() == Some(self.session_id.as_str()) {
            return Vec::new();
        }
        match message {
            Message::Snapshot(snapshot) => self.accept_snapshot(*snapshot, now),
            Message::Action(action) => self.commit(&action),
            Message::Presence(ping) => self.commit(&ping.into_action(now)),
            Message::Control(Control::PlayerDisconnect { payload, .. }) => {
                self.on_departure(&payload.session_id)
            }
            Message::Control(Control::PingHost { .. }) => self.answer_ping(),
            Message::Control(Control::PongHost { .. }) => Vec::new(),
        }
    }

    /// Adopt `snapshot` if it is the first state seen or strictly newer.
    pub fn accept_snapshot(&mut self, snapshot: GameState, now: DateTime<Utc>) -> Vec<Message> {
        let Some(current) = &self.state else {
            info!(session = %self.session_id, version = snapshot.version, "synced from snapshot");
            self.adopt(snapshot);
            return Vec::new();
        };

        let rival_creation = self.bootstrap == Bootstrap::Created
            && current.version == 1
            && snapshot.version == 1;
        if rival_creation {
            let rival = snapshot.sender_id.clone().unwrap_or_default();
            if rival.as_str() >= self.session_id.as_str() {
                debug!(session = %self.session_id, %rival, "kept own room over rival");
                return Vec::new();
            }
            info!(session = %self.session_id, %rival, "yielding room creation");
        } else if snapshot.version <= current.version {
            debug!(
                session = %self.session_id,
                held = current.version,
                offered = snapshot.version,
                "stale snapshot dropped"
            );
            return Vec::new();
        }

        let was_creator = self.bootstrap == Bootstrap::Created;
        self.adopt(snapshot);
        if was_creator && self.my_slot().is_none() {
            return self.join(now);
        }
        Vec::new()
    }

    fn adopt(&mut self, snapshot: GameState) {
        self.state = Some(snapshot);
        self.bootstrap = Bootstrap::Synced;
    }

    /// No snapshot arrived in time: create the room and claim slot 0.
    pub fn bootstrap_expired(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let Bootstrap::Awaiting { since } = self.bootstrap else {
            return Vec::new();
        };
        if self.state.is_some() {
            self.bootstrap = Bootstrap::Synced;
            return Vec::new();
        }

        let mut state = GameState::initial();
        state.players[0].claim(&self.player_name, &self.session_id, 0, now);
        state.host_id = Some(0);
        state.game_message = format!(
            "{} created the game. Waiting for other players...",
            self.player_name
        );
        state.restamp(&self.session_id);

        info!(
            session = %self.session_id,
            waited_ms = (now - since).num_milliseconds(),
            "no snapshot received, creating room"
        );
        self.state = Some(state.clone());
        self.bootstrap = Bootstrap::Created;
        vec![Message::Snapshot(Box::new(state))]
    }

    /// Apply one of our own actions and return it for broadcast.
    pub fn dispatch(&mut self, kind: ActionKind, now: DateTime<Utc>) -> Vec<Message> {
        if self.state.is_none() {
            debug!(
                session = %self.session_id,
                action = kind.as_str(),
                "no state yet, action dropped"
            );
            return Vec::new();
        }
        let action = Action::new(kind, self.session_id.clone(), now);
        let mut out = self.commit(&action);
        out.insert(0, Message::Action(action));
        out
    }

    /// Roll as many dice as the turn allows.
    pub fn roll<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) -> Vec<Message> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        if !state.can_roll || !state.is_current_session(&self.session_id) {
            return Vec::new();
        }
        let dice = (0..state.dice_to_roll()).map(|_| rng.gen_range(1..=6)).collect();
        self.dispatch(ActionKind::RollDice { dice }, now)
    }

    /// Take a slot, or queue for one if a game is running.
    pub fn join(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        if state.slot_of(&self.session_id).is_some() || state.has_join_request(&self.session_id) {
            return Vec::new();
        }
        let name = self.player_name.clone();
        let session_id = self.session_id.clone();
        let kind = if state.is_in_progress() {
            ActionKind::JoinRequest { name, session_id }
        } else {
            ActionKind::JoinGame { name, session_id }
        };
        self.dispatch(kind, now)
    }

    pub fn leave(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let session_id = self.session_id.clone();
        self.dispatch(ActionKind::LeaveGame { session_id }, now)
    }

    /// Refresh our own `last_seen` and announce it.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let Some(slot) = self.my_active_slot() else {
            return Vec::new();
        };
        let ping = PresencePing {
            player_id: slot,
            sender_id: self.session_id.clone(),
        };
        self.commit(&ping.clone().into_action(now));
        vec![Message::Presence(ping)]
    }

    /// Re-judge liveness and fix the host.
    ///
    /// Runs on the host, and on the designated successor once the host has
    /// been silent past the disconnect threshold.
    pub fn presence_tick(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let Some(me) = self.my_active_slot() else {
            return Vec::new();
        };
        let Some(state) = &self.state else {
            return Vec::new();
        };

        let is_host = state.host_id == Some(me);
        let takeover = !is_host
            && presence::successor(&self.scorer, state) == Some(me)
            && presence::host_lapsed(state, now, &self.thresholds);
        if !is_host && !takeover {
            return Vec::new();
        }

        let mut next = state.clone();
        let mut changed = presence::classify(&mut next, now, &self.thresholds);
        if takeover {
            if let Some(host) = next.host_id.and_then(|id| next.players.get_mut(id)) {
                if host.status != PlayerStatus::Disconnected {
                    host.status = PlayerStatus::Disconnected;
                    changed = true;
                }
            }
            info!(session = %self.session_id, slot = me, "host silent, taking over");
        }
        changed |= presence::elect_host(&self.scorer, &mut next);

        if !changed {
            return Vec::new();
        }
        self.publish_state(next)
    }

    fn on_departure(&mut self, departed: &str) -> Vec<Message> {
        let Some(me) = self.my_active_slot() else {
            return Vec::new();
        };
        let Some(state) = &self.state else {
            return Vec::new();
        };

        let host_left = state.host().is_some_and(|h| h.is_bound_to(departed));
        let responsible = if host_left {
            presence::successor(&self.scorer, state) == Some(me)
        } else {
            state.host_id == Some(me)
        };
        if !responsible {
            return Vec::new();
        }

        let mut next = state.clone();
        let Some(slot) = presence::mark_departed(&mut next, departed) else {
            return Vec::new();
        };
        presence::elect_host(&self.scorer, &mut next);
        info!(session = %self.session_id, slot, host_left, "player dropped");
        self.publish_state(next)
    }

    fn answer_ping(&self) -> Vec<Message> {
        if !self.is_host() {
            return Vec::new();
        }
        vec![Message::Control(Control::PongHost {
            host_name: self.player_name.clone(),
            sender_id: self.session_id.clone(),
        })]
    }

    /// Run `action` through the reducer.
    ///
    /// The host re-snapshots after membership changes so clients that
    /// bootstrapped from an older retained snapshot converge.
    fn commit(&mut self, action: &Action) -> Vec<Message> {
        let Some(state) = &self.state else {
            debug!(
                session = %self.session_id,
                action = action.kind.as_str(),
                "no state yet, action ignored"
            );
            return Vec::new();
        };
        let next = apply(&self.scorer, state, action);
        let changed = next != *state;
        let resnapshot = changed
            && action.kind.changes_membership()
            && next.is_host_session(&self.session_id);
        if resnapshot {
            return self.publish_state(next);
        }
        self.state = Some(next);
        Vec::new()
    }

    fn publish_state(&mut self, mut next: GameState) -> Vec<Message> {
        next.restamp(&self.session_id);
        debug!(session = %self.session_id, version = next.version, "publishing snapshot");
        self.state = Some(next.clone());
        vec![Message::Snapshot(Box::new(next))]
    }

    fn my_active_slot(&self) -> Option<SlotId> {
        let state = self.state.as_ref()?;
        state
            .slot_of(&self.session_id)
            .filter(|&slot| state.players[slot].is_active())
    }
}
