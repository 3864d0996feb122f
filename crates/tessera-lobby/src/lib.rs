//! Pre-game lobby coordination for Tessera.
//!
//! A lobby gathers 2–4 players, tracks who is ready, and, on the host's
//! word, hands its seat order to the session registry. Every successful
//! mutation is pushed as a full [`Lobby`](tessera_protocol::Lobby) snapshot
//! to each member, and the list of open lobbies is pushed to everyone not
//! seated anywhere.
//!
//! # Key types
//!
//! - [`LobbyCoordinator`]: owns every lobby and their subscribers
//! - [`LobbyConfig`]: seat limits and idle expiry
//! - [`LobbyError`]: why a request was refused

mod config;
mod coordinator;
mod error;

pub use config::LobbyConfig;
pub use coordinator::{LobbyCoordinator, LobbySender};
pub use error::LobbyError;
