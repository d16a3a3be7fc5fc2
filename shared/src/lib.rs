//! Wire protocol shared by the presence relay server and its clients.
//!
//! Every WebSocket message carries exactly one [`ClientMessage`] or
//! [`ServerMessage`]. Text frames hold JSON, binary frames hold bincode; see
//! the [`codec`] module for the framing rules.

pub mod codec;

pub use codec::{Frame, ProtocolError, WireFormat};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;

/// Where every participant appears when it joins.
pub const SPAWN_POSITION: Position = Position {
    x: WORLD_WIDTH / 2.0,
    y: WORLD_HEIGHT / 2.0,
};

/// Process-unique identifier of one accepted connection.
///
/// Allocated by the server when the transport connection is accepted and
/// never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rendering tag picked by the client at join time. The relay never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Appearance {
    Red,
    Blue,
    Green,
    Yellow,
}

impl Appearance {
    pub const ALL: [Appearance; 4] = [
        Appearance::Red,
        Appearance::Blue,
        Appearance::Green,
        Appearance::Yellow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Appearance::Red => "red",
            Appearance::Blue => "blue",
            Appearance::Green => "green",
            Appearance::Yellow => "yellow",
        }
    }
}

impl fmt::Display for Appearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Appearance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Appearance::ALL
            .into_iter()
            .find(|appearance| appearance.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown appearance '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// JSON has no representation for NaN or infinity, so positions that
    /// are not finite can never be relayed.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Returns this position clamped to the world rectangle.
    pub fn clamped(&self) -> Self {
        Self {
            x: self.x.clamp(0.0, WORLD_WIDTH),
            y: self.y.clamp(0.0, WORLD_HEIGHT),
        }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Position {
    fn default() -> Self {
        SPAWN_POSITION
    }
}

/// Public view of one joined participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub display_name: String,
    pub appearance: Appearance,
    pub position: Position,
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        display_name: String,
        appearance: Appearance,
        /// Identity already verified by the authentication service, kept
        /// for audit logging only.
        #[serde(default)]
        account: Option<String>,
    },
    Move {
        position: Position,
    },
    Leave,
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every accepted connection.
    Welcome { id: ConnectionId },
    /// Participants already present, sent only to a client that just joined.
    SessionView { participants: Vec<Participant> },
    Joined {
        id: ConnectionId,
        display_name: String,
        appearance: Appearance,
        position: Position,
    },
    Moved {
        id: ConnectionId,
        position: Position,
    },
    Left { id: ConnectionId },
    Error { reason: String },
    ServerClosing,
}

impl ServerMessage {
    pub fn joined(participant: &Participant) -> Self {
        ServerMessage::Joined {
            id: participant.id,
            display_name: participant.display_name.clone(),
            appearance: participant.appearance,
            position: participant.position,
        }
    }

    /// The participant this event is about, if any.
    pub fn subject(&self) -> Option<ConnectionId> {
        match self {
            ServerMessage::Welcome { id }
            | ServerMessage::Joined { id, .. }
            | ServerMessage::Moved { id, .. }
            | ServerMessage::Left { id } => Some(*id),
            _ => None,
        }
    }
}
