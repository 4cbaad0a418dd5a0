//! Liveness classification and host election.
//!
//! These run outside the reducer because they read a wall clock: the
//! replica calls them on its presence tick and publishes the result as a
//! fresh snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::state::{GameState, PlayerStatus, Scorer, SlotId};

/// Lapses after which a slot is judged away or disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub away_after: chrono::Duration,
    pub disconnect_after: chrono::Duration,
}

impl Thresholds {
    pub fn new(away_after: Duration, disconnect_after: Duration) -> Self {
        Self {
            away_after: to_chrono(away_after),
            disconnect_after: to_chrono(disconnect_after),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 1_000))
}

/// Re-judge every active slot that has reported in at least once.
///
/// Returns whether any status changed.
pub fn classify(state: &mut GameState, now: DateTime<Utc>, thresholds: &Thresholds) -> bool {
    let mut changed = false;
    for player in state.players.iter_mut().filter(|p| p.is_active()) {
        let Some(seen) = player.last_seen else {
            continue;
        };
        let status = PlayerStatus::after_lapse(
            now - seen,
            thresholds.away_after,
            thresholds.disconnect_after,
        );
        if status != player.status {
            info!(slot = player.slot_id, from = %player.status, to = %status, "presence changed");
            player.status = status;
            changed = true;
        }
    }
    changed
}

/// Replace a missing or disconnected host with the scorer's choice.
///
/// Leaves the host alone when nobody eligible remains. Returns whether the
/// host changed.
pub fn elect_host<S: Scorer + ?Sized>(scorer: &S, state: &mut GameState) -> bool {
    let valid = state
        .host()
        .is_some_and(|h| h.is_active() && h.status.can_host());
    if valid {
        return false;
    }
    match scorer.find_next_host(&state.players) {
        Some(slot) if Some(slot) != state.host_id => {
            info!(from = ?state.host_id, to = slot, "host re-elected");
            state.host_id = Some(slot);
            true
        }
        _ => false,
    }
}

/// Slot that would become host if the current host vanished.
pub fn successor<S: Scorer + ?Sized>(scorer: &S, state: &GameState) -> Option<SlotId> {
    let mut players = state.players.clone();
    if let Some(host) = state.host_id.and_then(|id| players.get_mut(id)) {
        host.status = PlayerStatus::Disconnected;
    }
    scorer.find_next_host(&players)
}

/// Whether the host has been silent for longer than the disconnect threshold.
pub fn host_lapsed(state: &GameState, now: DateTime<Utc>, thresholds: &Thresholds) -> bool {
    match state.host() {
        Some(host) if host.is_active() => {
            host.status == PlayerStatus::Disconnected
                || host
                    .last_seen
                    .map_or(true, |seen| now - seen > thresholds.disconnect_after)
        }
        _ => true,
    }
}

/// Mark the slot bound to `session_id` as gone.
pub fn mark_departed(state: &mut GameState, session_id: &str) -> Option<SlotId> {
    let slot = state.slot_of(session_id)?;
    let player = &mut state.players[slot];
    player.status = PlayerStatus::Disconnected;
    player.last_seen = None;
    Some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ThousandScorer;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(Duration::from_secs(20), Duration::from_secs(90))
    }

    fn room(slots: usize) -> GameState {
        let mut state = GameState::initial();
        for slot in 0..slots {
            state.players[slot].claim(&format!("P{slot}"), &format!("s{slot}"), 0, t(0));
        }
        state.host_id = Some(0);
        state
    }

    #[test]
    fn test_classify_moves_through_states() {
        let mut state = room(2);
        state.players[1].last_seen = Some(t(60_000));

        assert!(classify(&mut state, t(30_000), &thresholds()));
        assert_eq!(state.players[0].status, PlayerStatus::Away);
        assert_eq!(state.players[1].status, PlayerStatus::Online);

        assert!(classify(&mut state, t(100_000), &thresholds()));
        assert_eq!(state.players[0].status, PlayerStatus::Disconnected);

        assert!(!classify(&mut state, t(100_000), &thresholds()));
    }

    #[test]
    fn test_classify_skips_slots_never_seen() {
        let mut state = room(1);
        state.players[0].last_seen = None;
        assert!(!classify(&mut state, t(500_000), &thresholds()));
        assert_eq!(state.players[0].status, PlayerStatus::Online);
    }

    #[test]
    fn test_elect_replaces_disconnected_host() {
        let mut state = room(3);
        assert!(!elect_host(&ThousandScorer, &mut state));

        state.players[0].status = PlayerStatus::Disconnected;
        assert!(elect_host(&ThousandScorer, &mut state));
        assert_eq!(state.host_id, Some(1));
    }

    #[test]
    fn test_elect_keeps_host_when_nobody_eligible() {
        let mut state = room(1);
        state.players[0].status = PlayerStatus::Disconnected;
        assert!(!elect_host(&ThousandScorer, &mut state));
        assert_eq!(state.host_id, Some(0));
    }

    #[test]
    fn test_successor_skips_host() {
        let state = room(3);
        assert_eq!(successor(&ThousandScorer, &state), Some(1));
    }

    #[test]
    fn test_host_lapsed() {
        let state = room(2);
        assert!(!host_lapsed(&state, t(60_000), &thresholds()));
        assert!(host_lapsed(&state, t(91_000), &thresholds()));
    }

    #[test]
    fn test_mark_departed() {
        let mut state = room(2);
        assert_eq!(mark_departed(&mut state, "s1"), Some(1));
        assert_eq!(state.players[1].status, PlayerStatus::Disconnected);
        assert!(state.players[1].last_seen.is_none());
        assert_eq!(mark_departed(&mut state, "nobody"), None);
    }
}
