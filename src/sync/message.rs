//! Wire messages and room topics.
//!
//! Each room has three topics:
//!
//! ```text
//! thousand-app/room/ABCDE            snapshots (retained) + control messages
//! thousand-app/room/ABCDE/actions    actions
//! thousand-app/room/ABCDE/presence   heartbeats
//! ```
//!
//! All payloads are JSON. A payload on the main topic with a `type` field is a
//! control message; anything else there is a snapshot.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{Action, ActionKind, GameState, SessionId, SlotId};

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 5;

/// Characters used in generated room codes (no 0/O or 1/I).
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("topic {0} does not belong to this room")]
    UnknownTopic(String),
    #[error("invalid room code {0:?}")]
    InvalidRoomCode(String),
}

/// Trim and upper-case a user-entered room code.
pub fn normalize_room_code(raw: &str) -> Result<String, MessageError> {
    let code = raw.trim().to_uppercase();
    if code.chars().count() == ROOM_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code)
    } else {
        Err(MessageError::InvalidRoomCode(raw.to_string()))
    }
}

pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

/// Which of a room's topics a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    State,
    Actions,
    Presence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTopics {
    pub room: String,
    pub state: String,
    pub actions: String,
    pub presence: String,
}

impl RoomTopics {
    pub fn new(prefix: &str, room: &str) -> Result<Self, MessageError> {
        let room = normalize_room_code(room)?;
        let state = format!("{}/{room}", prefix.trim_end_matches('/'));
        Ok(Self {
            actions: format!("{state}/actions"),
            presence: format!("{state}/presence"),
            state,
            room,
        })
    }

    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::State => &self.state,
            Channel::Actions => &self.actions,
            Channel::Presence => &self.presence,
        }
    }

    pub fn channel_of(&self, topic: &str) -> Option<Channel> {
        [Channel::State, Channel::Actions, Channel::Presence]
            .into_iter()
            .find(|&c| self.topic(c) == topic)
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.state.clone(), self.actions.clone(), self.presence.clone()]
    }
}

/// Heartbeat body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePing {
    pub player_id: SlotId,
    pub sender_id: SessionId,
}

impl PresencePing {
    /// Heartbeats carry no clock; the receiver stamps them.
    pub fn into_action(self, received_at: DateTime<Utc>) -> Action {
        let sender = self.sender_id.clone();
        Action::new(
            ActionKind::PresenceUpdate {
                player_id: self.player_id,
                sender_id: self.sender_id,
            },
            sender,
            received_at,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    pub session_id: SessionId,
}

/// Non-snapshot traffic on the main topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Control {
    /// Last-will message published by the broker when a client drops.
    #[serde(rename_all = "camelCase")]
    PlayerDisconnect {
        payload: Departure,
        sender_id: SessionId,
    },
    /// "Is anyone hosting this room?"
    #[serde(rename_all = "camelCase")]
    PingHost { sender_id: SessionId },
    #[serde(rename_all = "camelCase")]
    PongHost {
        host_name: String,
        sender_id: SessionId,
    },
}

impl Control {
    pub fn departure(session_id: &str) -> Self {
        Self::PlayerDisconnect {
            payload: Departure {
                session_id: session_id.to_string(),
            },
            sender_id: session_id.to_string(),
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Self::PlayerDisconnect { sender_id, .. }
            | Self::PingHost { sender_id }
            | Self::PongHost { sender_id, .. } => sender_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Snapshot(Box<GameState>),
    Action(Action),
    Presence(PresencePing),
    Control(Control),
}

impl Message {
    pub fn decode(channel: Channel, payload: &str) -> Result<Self, MessageError> {
        Ok(match channel {
            Channel::State => {
                let value: serde_json::Value = serde_json::from_str(payload)?;
                if value.get("type").is_some() {
                    Self::Control(serde_json::from_value(value)?)
                } else {
                    Self::Snapshot(Box::new(serde_json::from_value(value)?))
                }
            }
            Channel::Actions => Self::Action(serde_json::from_str(payload)?),
            Channel::Presence => Self::Presence(serde_json::from_str(payload)?),
        })
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(match self {
            Self::Snapshot(state) => serde_json::to_string(state)?,
            Self::Action(action) => serde_json::to_string(action)?,
            Self::Presence(ping) => serde_json::to_string(ping)?,
            Self::Control(control) => serde_json::to_string(control)?,
        })
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Snapshot(_) | Self::Control(_) => Channel::State,
            Self::Action(_) => Channel::Actions,
            Self::Presence(_) => Channel::Presence,
        }
    }

    /// Only snapshots are retained by the broker.
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }

    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Self::Snapshot(state) => state.sender_id.as_deref(),
            Self::Action(action) => Some(&action.sender_id),
            Self::Presence(ping) => Some(&ping.sender_id),
            Self::Control(control) => Some(control.sender_id()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Action(action) => action.kind.as_str(),
            Self::Presence(_) => "presence",
            Self::Control(Control::PlayerDisconnect { .. }) => "playerDisconnect",
            Self::Control(Control::PingHost { .. }) => "pingHost",
            Self::Control(Control::PongHost { .. }) => "pongHost",
        }
    }
}
