//! The lobby coordinator: every lobby, one mutation path.

use std::collections::{BTreeMap, HashMap};

use tessera_protocol::{
    Lobby, LobbyId, LobbyMessage, LobbyStatus, PlayerId, Seat, SessionId,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{LobbyConfig, LobbyError};

/// Where lobby messages for one connection go.
pub type LobbySender = mpsc::UnboundedSender<LobbyMessage>;

#[derive(Debug)]
struct Entry {
    lobby: Lobby,
    /// Last successful mutation, for idle expiry.
    touched: Instant,
}

/// Owns every lobby on the server.
///
/// All methods take `&mut self`; the server keeps the coordinator behind
/// one lock, so mutations apply one at a time and concurrent joins resolve
/// in lock order. After each successful mutation the coordinator pushes the
/// full lobby to its members and the open-lobby list to every subscriber
/// not seated in a lobby. Sends to closed subscribers are ignored.
#[derive(Debug)]
pub struct LobbyCoordinator {
    config: LobbyConfig,
    lobbies: BTreeMap<LobbyId, Entry>,
    membership: HashMap<PlayerId, LobbyId>,
    subscribers: HashMap<PlayerId, LobbySender>,
    next_id: u64,
}

impl LobbyCoordinator {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            lobbies: BTreeMap::new(),
            membership: HashMap::new(),
            subscribers: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    // -- subscribers ------------------------------------------------------

    /// Routes lobby traffic for `player_id` to `sender`, replacing any
    /// earlier connection, and sends it the current list of open lobbies
    /// (or its own lobby, if it is seated in one).
    pub fn subscribe(&mut self, player_id: PlayerId, sender: LobbySender) {
        match self.membership.get(&player_id).and_then(|id| self.lobbies.get(id)) {
            Some(entry) => {
                let _ = sender.send(LobbyMessage::LobbyUpdate {
                    lobby: entry.lobby.clone(),
                });
            }
            None => {
                let _ = sender.send(LobbyMessage::LobbyListUpdate {
                    lobbies: self.list(),
                });
            }
        }
        self.subscribers.insert(player_id, sender);
    }

    /// The connection behind `sender` went away.
    ///
    /// Ignored if `player_id` has since subscribed from another
    /// connection. Otherwise the subscription ends and, if the player sits
    /// in a waiting lobby, the player leaves it.
    pub fn disconnect(&mut self, player_id: &PlayerId, sender: &LobbySender, now: Instant) {
        let current = self
            .subscribers
            .get(player_id)
            .is_some_and(|s| s.same_channel(sender));
        if !current {
            return;
        }
        self.subscribers.remove(player_id);

        let waiting = self
            .membership
            .get(player_id)
            .and_then(|id| self.lobbies.get(id))
            .filter(|e| e.lobby.status == LobbyStatus::Waiting)
            .map(|e| e.lobby.id);
        if let Some(lobby_id) = waiting {
            let _ = self.leave(lobby_id, player_id, now);
        }
    }

    // -- queries ----------------------------------------------------------

    /// Lobbies still accepting players, oldest first.
    pub fn list(&self) -> Vec<Lobby> {
        self.lobbies
            .values()
            .filter(|e| e.lobby.status.is_joinable())
            .map(|e| e.lobby.clone())
            .collect()
    }

    pub fn get(&self, lobby_id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(&lobby_id).map(|e| &e.lobby)
    }

    /// The lobby `player_id` is seated in.
    pub fn lobby_of(&self, player_id: &PlayerId) -> Option<LobbyId> {
        self.membership.get(player_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    // -- mutations --------------------------------------------------------

    /// Opens a lobby with `host` in the first seat, ready.
    pub fn create(
        &mut self,
        host: PlayerId,
        host_name: String,
        name: String,
        now: Instant,
    ) -> Result<Lobby, LobbyError> {
        if let Some(&current) = self.membership.get(&host) {
            return Err(LobbyError::AlreadyInLobby(host, current));
        }

        self.next_id += 1;
        let id = LobbyId(self.next_id);
        let name = if name.trim().is_empty() {
            format!("{host_name}'s game")
        } else {
            name
        };
        let lobby = Lobby {
            id,
            name,
            host: host.clone(),
            seats: vec![Seat {
                player_id: host.clone(),
                name: host_name,
                ready: true,
            }],
            min_players: self.config.min_players,
            max_players: self.config.max_players,
            status: LobbyStatus::Waiting,
            session_id: None,
        };

        info!(lobby_id = %id, %host, "lobby created");
        self.membership.insert(host, id);
        self.lobbies.insert(
            id,
            Entry {
                lobby: lobby.clone(),
                touched: now,
            },
        );
        self.publish(id);
        Ok(lobby)
    }

    /// Seats `player_id`, not ready.
    pub fn join(
        &mut self,
        lobby_id: LobbyId,
        player_id: PlayerId,
        name: String,
        now: Instant,
    ) -> Result<Lobby, LobbyError> {
        match self.membership.get(&player_id) {
            Some(&current) if current == lobby_id => {
                return Err(LobbyError::AlreadyJoined(player_id, lobby_id));
            }
            Some(&current) => {
                return Err(LobbyError::AlreadyInLobby(player_id, current));
            }
            None => {}
        }

        let entry = self.entry_mut(lobby_id)?;
        if !entry.lobby.status.is_joinable() {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }
        if entry.lobby.is_full() {
            return Err(LobbyError::LobbyFull(lobby_id));
        }

        entry.lobby.seats.push(Seat {
            player_id: player_id.clone(),
            name,
            ready: false,
        });
        entry.touched = now;
        let lobby = entry.lobby.clone();

        info!(%lobby_id, %player_id, seats = lobby.seats.len(), "player joined lobby");
        self.membership.insert(player_id, lobby_id);
        self.publish(lobby_id);
        Ok(lobby)
    }

    /// Unseats `player_id`. If the host leaves, the longest-seated
    /// remaining player becomes host and is marked ready. The last player
    /// out destroys the lobby, in which case `None` is returned.
    pub fn leave(
        &mut self,
        lobby_id: LobbyId,
        player_id: &PlayerId,
        now: Instant,
    ) -> Result<Option<Lobby>, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        if !entry.lobby.is_member(player_id) {
            return Err(LobbyError::NotInLobby(player_id.clone(), lobby_id));
        }
        if !entry.lobby.status.is_joinable() {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }

        entry.lobby.seats.retain(|s| &s.player_id != player_id);
        entry.touched = now;

        if let Some(successor) = entry.lobby.seats.first_mut() {
            if &entry.lobby.host == player_id {
                successor.ready = true;
                entry.lobby.host = successor.player_id.clone();
                info!(%lobby_id, new_host = %entry.lobby.host, "host migrated");
            }
        }

        self.membership.remove(player_id);
        info!(%lobby_id, %player_id, "player left lobby");

        let empty = self
            .lobbies
            .get(&lobby_id)
            .is_some_and(|e| e.lobby.seats.is_empty());
        if empty {
            self.lobbies.remove(&lobby_id);
            info!(%lobby_id, "empty lobby destroyed");
            self.publish_list();
            return Ok(None);
        }

        self.publish(lobby_id);
        Ok(self.get(lobby_id).cloned())
    }

    /// Marks a seat ready or not. The host's seat ignores `ready = false`.
    pub fn set_ready(
        &mut self,
        lobby_id: LobbyId,
        player_id: &PlayerId,
        ready: bool,
        now: Instant,
    ) -> Result<Lobby, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        if !entry.lobby.status.is_joinable() {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }
        let is_host = &entry.lobby.host == player_id;
        let seat = entry
            .lobby
            .seats
            .iter_mut()
            .find(|s| &s.player_id == player_id)
            .ok_or_else(|| LobbyError::NotInLobby(player_id.clone(), lobby_id))?;

        seat.ready = ready || is_host;
        entry.touched = now;
        let lobby = entry.lobby.clone();

        debug!(%lobby_id, %player_id, ready, "ready toggled");
        self.publish(lobby_id);
        Ok(lobby)
    }

    /// The host asks to start. On success the lobby is `Starting` and the
    /// seat order (sorted player ids) is returned for session creation.
    pub fn start(
        &mut self,
        lobby_id: LobbyId,
        requester: &PlayerId,
    ) -> Result<Vec<PlayerId>, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        let lobby = &mut entry.lobby;
        if &lobby.host != requester {
            return Err(LobbyError::NotHost(lobby_id));
        }
        if !lobby.status.can_transition_to(LobbyStatus::Starting) {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }
        if lobby.seats.len() < lobby.min_players {
            return Err(LobbyError::BelowMinPlayers {
                lobby_id,
                min: lobby.min_players,
                have: lobby.seats.len(),
            });
        }
        if !lobby.all_ready() {
            return Err(LobbyError::NotAllReady(lobby_id));
        }

        lobby.status = LobbyStatus::Starting;
        let order = lobby.seat_order();
        info!(%lobby_id, seats = order.len(), "lobby starting");
        self.publish(lobby_id);
        Ok(order)
    }

    /// The session for a starting lobby exists. Members get `GAME_START`.
    pub fn promote(
        &mut self,
        lobby_id: LobbyId,
        session_id: SessionId,
    ) -> Result<Lobby, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        if !entry.lobby.status.can_transition_to(LobbyStatus::InProgress) {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }
        entry.lobby.status = LobbyStatus::InProgress;
        entry.lobby.session_id = Some(session_id);
        let lobby = entry.lobby.clone();

        info!(%lobby_id, %session_id, "lobby promoted to session");
        self.publish(lobby_id);
        self.send_members(
            &lobby,
            LobbyMessage::GameStart {
                lobby_id,
                session_id: Some(session_id),
                seats: lobby.seat_order(),
            },
        );
        Ok(lobby)
    }

    /// `player_id` is out of `session_id` for good (left, failed to
    /// reconnect, or removed). The seat stays in the lobby snapshot, but
    /// the player may create or join another lobby. Returns the lobby the
    /// player was released from, if the player was still a member of the
    /// lobby running that session.
    pub fn release(&mut self, player_id: &PlayerId, session_id: SessionId) -> Option<LobbyId> {
        let lobby_id = *self.membership.get(player_id)?;
        let running = self.lobbies.get(&lobby_id).is_some_and(|e| {
            e.lobby.status == LobbyStatus::InProgress && e.lobby.session_id == Some(session_id)
        });
        if !running {
            return None;
        }
        self.membership.remove(player_id);
        info!(%lobby_id, %session_id, %player_id, "player released from running lobby");
        self.publish_list();
        Some(lobby_id)
    }

    /// Session creation failed; the lobby goes back to waiting.
    pub fn abort_start(&mut self, lobby_id: LobbyId, now: Instant) -> Result<Lobby, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        if !entry.lobby.status.can_transition_to(LobbyStatus::Waiting) {
            return Err(LobbyError::LobbyClosed(lobby_id));
        }
        entry.lobby.status = LobbyStatus::Waiting;
        entry.touched = now;
        let lobby = entry.lobby.clone();
        info!(%lobby_id, "lobby start aborted");
        self.publish(lobby_id);
        Ok(lobby)
    }

    /// The lobby's session ended. The lobby is marked finished and
    /// destroyed.
    pub fn finish(&mut self, lobby_id: LobbyId, reason: &str) -> Result<Lobby, LobbyError> {
        let entry = self.entry_mut(lobby_id)?;
        entry.lobby.status = LobbyStatus::Finished;
        self.close(lobby_id, reason)
    }

    /// Destroys a lobby in any state. Members get `LOBBY_CLOSED`.
    pub fn close(&mut self, lobby_id: LobbyId, reason: &str) -> Result<Lobby, LobbyError> {
        let entry = self
            .lobbies
            .remove(&lobby_id)
            .ok_or(LobbyError::NotFound(lobby_id))?;

        info!(%lobby_id, reason, "lobby closed");
        self.send_members(
            &entry.lobby,
            LobbyMessage::LobbyClosed {
                lobby_id,
                reason: reason.to_string(),
            },
        );
        // released seats may already belong to another lobby
        self.membership.retain(|_, id| *id != lobby_id);
        self.publish_list();
        Ok(entry.lobby)
    }

    /// Closes every waiting lobby untouched for the idle timeout.
    pub fn expire_idle(&mut self, now: Instant) -> Vec<LobbyId> {
        let idle = self.config.idle_timeout;
        let stale: Vec<LobbyId> = self
            .lobbies
            .values()
            .filter(|e| e.lobby.status == LobbyStatus::Waiting)
            .filter(|e| now.saturating_duration_since(e.touched) >= idle)
            .map(|e| e.lobby.id)
            .collect();

        for &lobby_id in &stale {
            let _ = self.close(lobby_id, "idle timeout");
        }
        stale
    }

    // -- internals --------------------------------------------------------

    fn entry_mut(&mut self, lobby_id: LobbyId) -> Result<&mut Entry, LobbyError> {
        self.lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::NotFound(lobby_id))
    }

    /// Pushes the lobby to its members and the list to everyone else.
    fn publish(&self, lobby_id: LobbyId) {
        if let Some(entry) = self.lobbies.get(&lobby_id) {
            self.send_members(
                &entry.lobby,
                LobbyMessage::LobbyUpdate {
                    lobby: entry.lobby.clone(),
                },
            );
        }
        self.publish_list();
    }

    fn publish_list(&self) {
        let lobbies = self.list();
        for (player_id, sender) in &self.subscribers {
            if !self.membership.contains_key(player_id) {
                let _ = sender.send(LobbyMessage::LobbyListUpdate {
                    lobbies: lobbies.clone(),
                });
            }
        }
    }

    /// Sends to every seat still a member of `lobby`; released seats are
    /// skipped.
    fn send_members(&self, lobby: &Lobby, msg: LobbyMessage) {
        for seat in &lobby.seats {
            if self.membership.get(&seat.player_id) != Some(&lobby.id) {
                continue;
            }
            if let Some(sender) = self.subscribers.get(&seat.player_id) {
                let _ = sender.send(msg.clone());
            }
        }
    }
}
