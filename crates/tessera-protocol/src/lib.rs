//! Wire protocol for Tessera.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Envelope** ([`Envelope`], [`Payload`]): the outer frame every message
//!   travels in, carrying a sequence number and a timestamp.
//! - **Families**: [`SystemMessage`] (handshake plumbing),
//!   [`LobbyMessage`] (pre-game) and [`GameMessage`] (in-session).
//! - **Model** ([`Move`], [`Lobby`], [`ScoreVector`], [`SessionView`], ...):
//!   the data those messages carry.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, bytes out.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the
//! coordination layers. It knows nothing about connections or sessions;
//! it only describes what a message looks like.
//!
//! ```text
//! Transport (frames) → Protocol (Envelope) → Lobby / Session actors
//! ```
//!
//! # Evolution
//!
//! Every message family is internally tagged by a `type` field. Fields added
//! after version 1 carry `#[serde(default)]` so older peers still decode.

mod codec;
mod error;
mod game;
mod lobby;
mod model;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use game::{AppliedMove, GameMessage};
pub use lobby::LobbyMessage;
pub use model::{
    GameResult, Line, Lobby, LobbyStatus, Move, Phase, ScoreCheckpoint,
    ScoreEvent, ScoreKind, ScoreVector, Seat, SeatStatus, SeatView,
    SessionView, Standing, TileColor, TileSource,
};
pub use types::{
    Envelope, LobbyId, PROTOCOL_VERSION, Payload, PlayerId, Recipient,
    SessionId, SystemMessage,
};
