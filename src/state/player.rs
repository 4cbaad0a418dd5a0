//! Player slots.
//!
//! A room has a fixed number of slots; the slot index is the player's
//! identity key inside [`GameState`](super::GameState). A slot is either
//! unclaimed (a placeholder with a default name) or claimed by a session.
//!
//! # Liveness
//!
//! ```text
//! ┌────────┐  lapse > away   ┌──────┐  lapse > disconnect  ┌──────────────┐
//! │ Online │────────────────▶│ Away │─────────────────────▶│ Disconnected │
//! └────────┘                 └──────┘                      └──────────────┘
//!      ▲                         │                                │
//!      └─────────────────────────┴──────── heartbeat ─────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque identity of a connected client session.
pub type SessionId = String;

/// Index of a player slot.
pub type SlotId = usize;

/// Text used on the wire for a bolt entry.
pub const BOLT_MARKER: &str = "/";

/// Liveness of a claimed slot, as last judged by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Online,
    Away,
    Disconnected,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the slot may hold host authority.
    pub fn can_host(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Status after `lapse` without a heartbeat, given the two thresholds.
    ///
    /// A heartbeat is modelled as a zero lapse and always yields `Online`.
    pub fn after_lapse(
        lapse: chrono::Duration,
        away_after: chrono::Duration,
        disconnect_after: chrono::Duration,
    ) -> Self {
        if lapse > disconnect_after {
            Self::Disconnected
        } else if lapse > away_after {
            Self::Away
        } else {
            Self::Online
        }
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a player's score sheet.
///
/// Bolts are kept distinct from a numeric zero so the history shows
/// which turns failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreEntry {
    Points(i32),
    Bolt,
}

impl ScoreEntry {
    /// Numeric contribution to the total (bolts count as nothing).
    pub fn points(&self) -> i32 {
        match self {
            Self::Points(p) => *p,
            Self::Bolt => 0,
        }
    }

    pub fn is_bolt(&self) -> bool {
        matches!(self, Self::Bolt)
    }
}

impl Serialize for ScoreEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Points(p) => serializer.serialize_i32(*p),
            Self::Bolt => serializer.serialize_str(BOLT_MARKER),
        }
    }
}

impl<'de> Deserialize<'de> for ScoreEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Points(i32),
            Marker(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Points(p) => Ok(Self::Points(p)),
            Raw::Marker(m) if m == BOLT_MARKER => Ok(Self::Bolt),
            Raw::Marker(m) => Err(serde::de::Error::custom(format!(
                "unknown score marker {m:?}"
            ))),
        }
    }
}

/// A player slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    #[serde(rename = "id")]
    pub slot_id: SlotId,
    pub name: String,
    pub is_claimed: bool,
    #[serde(default)]
    pub is_spectator: bool,
    #[serde(default)]
    pub scores: Vec<ScoreEntry>,
    #[serde(default)]
    pub barrel_bolts: u32,
    #[serde(default)]
    pub has_entered_game: bool,
    #[serde(default)]
    pub status: PlayerStatus,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Set when a barrel forfeit or knock-off moved this player back;
    /// shields them from the overtake penalty until their next turn ends.
    #[serde(default)]
    pub just_reset_from_barrel: bool,
}

impl Player {
    /// Placeholder for an empty slot.
    pub fn unclaimed(slot_id: SlotId) -> Self {
        Self {
            slot_id,
            name: Self::default_name(slot_id),
            is_claimed: false,
            is_spectator: false,
            scores: Vec::new(),
            barrel_bolts: 0,
            has_entered_game: false,
            status: PlayerStatus::Online,
            session_id: None,
            last_seen: None,
            just_reset_from_barrel: false,
        }
    }

    pub fn default_name(slot_id: SlotId) -> String {
        format!("Player {}", slot_id + 1)
    }

    /// Bind this slot to a session.
    ///
    /// A non-zero `restored` score (from a previous visit under the same
    /// name) becomes the first entry and counts as having entered the game.
    pub fn claim(&mut self, name: &str, session_id: &str, restored: i32, now: DateTime<Utc>) {
        self.name = name.to_string();
        self.is_claimed = true;
        self.is_spectator = false;
        self.scores = if restored != 0 {
            vec![ScoreEntry::Points(restored)]
        } else {
            Vec::new()
        };
        self.has_entered_game = restored != 0;
        self.barrel_bolts = 0;
        self.status = PlayerStatus::Online;
        self.session_id = Some(session_id.to_string());
        self.last_seen = Some(now);
        self.just_reset_from_barrel = false;
    }

    /// Claimed and playing (not watching).
    pub fn is_active(&self) -> bool {
        self.is_claimed && !self.is_spectator
    }

    pub fn is_bound_to(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    /// Clear per-game progress, keeping identity.
    pub fn reset_for_new_game(&mut self) {
        self.scores.clear();
        self.has_entered_game = false;
        self.barrel_bolts = 0;
        self.just_reset_from_barrel = false;
    }
}
