//! The lobby message family.

use serde::{Deserialize, Serialize};

use crate::{Lobby, LobbyId, PlayerId, SessionId};

/// Pre-game messages.
///
/// Requests and broadcasts share the family; each variant notes its
/// direction. Every successful lobby mutation is answered with a
/// `LOBBY_UPDATE` to the lobby's members, never with a direct reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyMessage {
    /// Client → Server: open a lobby with the sender as host.
    LobbyCreate { name: String },

    /// Server → Client: the full lobby after a mutation.
    LobbyUpdate { lobby: Lobby },

    /// Server → Client: every lobby still accepting players.
    LobbyListUpdate { lobbies: Vec<Lobby> },

    /// Client → Server: take a seat.
    PlayerJoined { lobby_id: LobbyId },

    /// Client → Server: give up a seat.
    PlayerLeft { lobby_id: LobbyId },

    /// Client → Server: toggle readiness.
    PlayerReady { lobby_id: LobbyId, ready: bool },

    /// Client → Server (host only): promote the lobby to a session.
    ///
    /// Server → Client: the session exists. `seats` is the seat order;
    /// every client derives the same one from the lobby anyway.
    GameStart {
        lobby_id: LobbyId,
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        seats: Vec<PlayerId>,
    },

    /// Server → Client: the lobby no longer exists.
    LobbyClosed { lobby_id: LobbyId, reason: String },

    /// Server → Client: a lobby request failed. Nothing changed.
    Error {
        message: String,
        #[serde(default)]
        lobby: Option<Lobby>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_are_screaming_snake_case() {
        let msg = LobbyMessage::PlayerReady {
            lobby_id: LobbyId(4),
            ready: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PLAYER_READY");
        assert_eq!(json["lobby_id"], 4);

        let list = LobbyMessage::LobbyListUpdate { lobbies: vec![] };
        assert_eq!(
            serde_json::to_value(&list).unwrap()["type"],
            "LOBBY_LIST_UPDATE"
        );
    }

    #[test]
    fn test_game_start_request_needs_only_lobby_id() {
        let msg: LobbyMessage =
            serde_json::from_str(r#"{"type":"GAME_START","lobby_id":7}"#)
                .unwrap();
        assert_eq!(
            msg,
            LobbyMessage::GameStart {
                lobby_id: LobbyId(7),
                session_id: None,
                seats: vec![],
            }
        );
    }

    #[test]
    fn test_error_without_lobby_decodes() {
        let msg: LobbyMessage =
            serde_json::from_str(r#"{"type":"ERROR","message":"lobby full"}"#)
                .unwrap();
        assert!(matches!(msg, LobbyMessage::Error { lobby: None, .. }));
    }
}
