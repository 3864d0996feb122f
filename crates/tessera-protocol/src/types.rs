//! Identity types and the outer frame of every message.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::{GameMessage, LobbyMessage};

/// Protocol version spoken by this crate. Clients send it in their
/// handshake and the server rejects any other value.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player, and therefore for the seat that player
/// occupies in a session.
///
/// Player ids are strings chosen by the client at handshake. They order
/// lexicographically, which is what makes seat order derivable on every
/// client without a round trip.
///
/// `#[serde(transparent)]` keeps the JSON a plain string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a lobby for as long as the server runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LobbyId(pub u64);

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

/// Identifies a game session. Also the prefix of its snapshot files.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient: who should receive a message?
// ---------------------------------------------------------------------------

/// Specifies which seats of a session receive a server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every seat in the session.
    All,

    /// One specific seat.
    Player(PlayerId),

    /// Everyone except the given seat.
    AllExcept(PlayerId),
}

impl Recipient {
    /// Whether `player` is addressed by this recipient.
    pub fn includes(&self, player: &PlayerId) -> bool {
        match self {
            Self::All => true,
            Self::Player(target) => target == player,
            Self::AllExcept(excluded) => excluded != player,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemMessage: connection plumbing
// ---------------------------------------------------------------------------

/// Messages about the connection itself rather than the lobby or the game.
///
/// Liveness is not here: it uses the reserved `PING`/`PONG` frames handled by
/// the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    /// Client → Server: first frame on every connection.
    Handshake {
        version: u32,
        player_id: PlayerId,
        name: String,
    },

    /// Server → Client: the connection is identified.
    /// `server_time` is milliseconds since the server started.
    HandshakeAck {
        player_id: PlayerId,
        server_time: u64,
    },

    /// Either direction: "I'm disconnecting." Voluntary on the client side;
    /// on the server side sent when a newer connection supersedes this one.
    Disconnect { reason: String },

    /// Server → Client: a request could not be processed.
    /// `code` follows HTTP conventions (400, 401, 404, 409).
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Payload and Envelope
// ---------------------------------------------------------------------------

/// The content of a frame: one message from one family.
///
/// `B` is the rule engine's board state, carried opaquely inside
/// [`SessionView`](crate::SessionView).
///
/// Adjacently tagged, so the family can be read before the body:
///   `{ "type": "Game", "data": { "type": "MOVE", ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload<B> {
    System(SystemMessage),
    Lobby(LobbyMessage),
    Game(GameMessage<B>),
}

/// The top-level wire frame.
///
/// ```text
/// ┌──────────────────────────────┐
/// │ seq: 42                      │  ← per-sender ordering
/// │ timestamp: 15000             │  ← sender's clock, ms
/// │ ┌──────────────────────────┐ │
/// │ │ payload: Game(MOVE ...)  │ │
/// │ └──────────────────────────┘ │
/// └──────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B> {
    /// Auto-incrementing, maintained independently by each sender.
    pub seq: u64,

    /// Milliseconds on the sender's clock.
    pub timestamp: u64,

    pub payload: Payload<B>,
}
