//! Actions: the unit of mutation exchanged between clients.
//!
//! On the wire an action is
//!
//! ```text
//! {"type": "rollDice", "payload": {"dice": [2, 2, 2, 6, 6]}, "senderId": "...", "timestamp": 1700000000000}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::player::{SessionId, SlotId};

/// What an action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ActionKind {
    #[serde(rename_all = "camelCase")]
    JoinGame { name: String, session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    JoinRequest { name: String, session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    ResolveJoinRequest {
        request_session_id: SessionId,
        accepted: bool,
    },
    #[serde(rename_all = "camelCase")]
    LeaveGame { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    KickPlayer {
        player_id: SlotId,
        session_id: SessionId,
    },
    StartOfficialGame,
    NewGame,
    RollDice { dice: Vec<u8> },
    ToggleDieSelection { index: usize },
    KeepDice { indices: Vec<usize> },
    BankScore,
    SkipTurn,
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        player_id: SlotId,
        sender_id: SessionId,
    },
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinGame { .. } => "joinGame",
            Self::JoinRequest { .. } => "joinRequest",
            Self::ResolveJoinRequest { .. } => "resolveJoinRequest",
            Self::LeaveGame { .. } => "leaveGame",
            Self::KickPlayer { .. } => "kickPlayer",
            Self::StartOfficialGame => "startOfficialGame",
            Self::NewGame => "newGame",
            Self::RollDice { .. } => "rollDice",
            Self::ToggleDieSelection { .. } => "toggleDieSelection",
            Self::KeepDice { .. } => "keepDice",
            Self::BankScore => "bankScore",
            Self::SkipTurn => "skipTurn",
            Self::PresenceUpdate { .. } => "presenceUpdate",
        }
    }

    /// Actions that change who is in the room.
    pub fn changes_membership(&self) -> bool {
        matches!(
            self,
            Self::JoinGame { .. }
                | Self::JoinRequest { .. }
                | Self::LeaveGame { .. }
                | Self::KickPlayer { .. }
        )
    }
}

/// An action stamped with its author and time.
///
/// The timestamp is the only clock the reducer sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub sender_id: SessionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(
        kind: ActionKind,
        sender_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            sender_id: sender_id.into(),
            timestamp,
        }
    }
}
