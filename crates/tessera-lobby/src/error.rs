//! Error types for the lobby layer.

use tessera_protocol::{LobbyId, PlayerId};

/// Why a lobby request was refused. A refused request changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby {0} not found")]
    NotFound(LobbyId),

    /// Every seat is taken.
    #[error("lobby {0} is full")]
    LobbyFull(LobbyId),

    /// The lobby has started or finished and no longer takes changes.
    #[error("lobby {0} is closed")]
    LobbyClosed(LobbyId),

    #[error("player {0} already joined lobby {1}")]
    AlreadyJoined(PlayerId, LobbyId),

    /// The player sits in a different lobby.
    #[error("player {0} is already in lobby {1}")]
    AlreadyInLobby(PlayerId, LobbyId),

    #[error("player {0} is not in lobby {1}")]
    NotInLobby(PlayerId, LobbyId),

    #[error("only the host of lobby {0} can do that")]
    NotHost(LobbyId),

    #[error("not every seat in lobby {0} is ready")]
    NotAllReady(LobbyId),

    #[error("lobby {lobby_id} needs {min} players, has {have}")]
    BelowMinPlayers { lobby_id: LobbyId, min: usize, have: usize },
}
