//! # Tessera
//!
//! Authoritative multiplayer coordination for a tile-drafting board game.
//!
//! The server side wires the layer crates together: WebSocket transport,
//! the lobby coordinator, and one actor per game session with its turn
//! clock, seat recovery, score reconciler and snapshots. The client side
//! ([`GameClient`], [`Presentation`]) speaks the same protocol, reconnects
//! on its own, and delivers events to UI callbacks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tessera::prelude::*;
//! use tessera_rules::AzulRules;
//!
//! # async fn run() -> Result<(), TesseraError> {
//! let config = ServerConfig::load(std::path::Path::new("tessera.toml")).await?;
//! let server = TesseraServerBuilder::new()
//!     .config(config)
//!     .build(AzulRules::new(), ClaimedIdentity)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod client;
pub mod config;
mod error;
mod handler;
pub mod logging;
mod presentation;
mod server;
mod tracker;

pub use client::{ClientConfig, ClientEvent, ConnectionStatus, GameClient};
pub use config::{ConfigError, ServerConfig};
pub use error::TesseraError;
pub use presentation::{
    ConnectionSink, GameSink, LobbySink, Presentation, TurnNotice, TurnPhase,
};
pub use server::{TesseraServer, TesseraServerBuilder};
pub use tessera_transport::{ConnectPolicy, HeartbeatConfig};
pub use tracker::{Drift, ScoreTracker};

pub mod prelude {
    pub use crate::{
        ClientConfig, ClientEvent, ConnectPolicy, ConnectionSink, ConnectionStatus, GameClient,
        GameSink, LobbySink, Presentation, ServerConfig, TesseraError, TesseraServer,
        TesseraServerBuilder, TurnNotice, TurnPhase,
    };
    pub use tessera_game::{RuleEngine, SessionConfig};
    pub use tessera_protocol::{
        GameMessage, GameResult, Lobby, LobbyId, LobbyMessage, Move, PlayerId, SeatStatus,
        SessionId, SessionView,
    };
    pub use tessera_recovery::{Authenticator, ClaimedIdentity};
}
