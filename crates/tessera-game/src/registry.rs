//! Session registry: creates, restores and tracks live sessions, and knows
//! which session each player is seated in.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_protocol::{LobbyId, Phase, PlayerId, SessionId};
use tessera_snapshot::FileSnapshotStore;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actor::spawn_session;
use crate::{
    RuleEngine, SeatSender, SessionConfig, SessionCore, SessionError, SessionEvent, SessionHandle,
    SessionRecord,
};

/// A seat of a session being created, with the connection it plays on.
pub struct SeatAttachment<S> {
    pub player_id: PlayerId,
    pub conn_id: u64,
    pub sender: SeatSender<S>,
}

/// All live sessions of one server.
///
/// A player holds at most one seat in one live session. The index is kept
/// until the player leaves for good or the session closes.
pub struct SessionRegistry<R: RuleEngine> {
    rules: Arc<R>,
    config: SessionConfig,
    store: Option<Arc<FileSnapshotStore>>,
    sessions: HashMap<SessionId, SessionHandle<R>>,
    seats: HashMap<PlayerId, SessionId>,
    next_id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<R: RuleEngine> SessionRegistry<R> {
    /// Creates an empty registry. Closed sessions are reported on the
    /// returned receiver; whoever owns the registry should
    /// [`remove`](Self::remove) them.
    pub fn new(
        rules: Arc<R>,
        config: SessionConfig,
        store: Option<Arc<FileSnapshotStore>>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            rules,
            config,
            store,
            sessions: HashMap::new(),
            seats: HashMap::new(),
            next_id: 1,
            events,
        };
        (registry, rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts a session for `seats` and returns its handle. Every seat
    /// receives its `JOIN` (with its reconnect token) and the opening
    /// `SYNC` on its sender.
    ///
    /// # Errors
    /// [`SessionError::BelowMinPlayers`] or, if any player is already in a
    /// live session, [`SessionError::AlreadySeated`].
    pub fn create(
        &mut self,
        lobby_id: Option<LobbyId>,
        seats: Vec<SeatAttachment<R::State>>,
    ) -> Result<SessionHandle<R>, SessionError> {
        if seats.len() < self.config.min_players {
            return Err(SessionError::BelowMinPlayers {
                min: self.config.min_players,
                have: seats.len(),
            });
        }
        if let Some((player_id, session_id)) = seats
            .iter()
            .find_map(|s| self.seats.get(&s.player_id).map(|id| (s.player_id.clone(), *id)))
        {
            return Err(SessionError::AlreadySeated(player_id, session_id));
        }

        let session_id = SessionId(self.next_id);
        self.next_id += 1;

        let players: Vec<PlayerId> = seats.iter().map(|s| s.player_id.clone()).collect();
        let core = SessionCore::new(
            session_id,
            lobby_id,
            Arc::clone(&self.rules),
            self.config.clone(),
            players.clone(),
            Instant::now(),
        );
        let attached = seats
            .into_iter()
            .map(|s| (s.player_id, s.conn_id, s.sender))
            .collect();
        let handle = spawn_session(
            core,
            attached,
            Arc::clone(&self.rules),
            &self.config,
            self.store.clone(),
            self.events.clone(),
        );

        for player_id in players {
            self.seats.insert(player_id, session_id);
        }
        self.sessions.insert(session_id, handle.clone());
        info!(%session_id, lobby_id = ?lobby_id, seats = self.seats_of(session_id), "session created");
        Ok(handle)
    }

    /// Brings back every unfinished session found in the snapshot store.
    /// Seats come back disconnected and have the usual recovery window to
    /// reclaim their seat with their old token.
    ///
    /// Sessions whose newest snapshot shows a finished game are discarded.
    /// Returns the restored ids.
    pub async fn restore_all(&mut self) -> Result<Vec<SessionId>, SessionError> {
        let Some(store) = self.store.clone() else {
            return Ok(Vec::new());
        };

        let mut restored = Vec::new();
        for session_id in store.list_sessions().await? {
            self.next_id = self.next_id.max(session_id.0 + 1);
            if self.sessions.contains_key(&session_id) {
                continue;
            }

            let snapshot = match store.load_latest::<SessionRecord<R::State>>(session_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%session_id, error = %e, "session could not be restored");
                    continue;
                }
            };
            if snapshot.state.view.phase == Phase::GameEnd {
                info!(%session_id, "finished session discarded");
                store.discard(session_id).await?;
                continue;
            }

            let core = SessionCore::restore(
                Arc::clone(&self.rules),
                self.config.clone(),
                snapshot.state,
                Instant::now(),
            );
            let held: Vec<PlayerId> = core
                .seats()
                .iter()
                .filter(|p| core.links().is_active(p))
                .cloned()
                .collect();
            let handle = spawn_session(
                core,
                Vec::new(),
                Arc::clone(&self.rules),
                &self.config,
                Some(Arc::clone(&store)),
                self.events.clone(),
            );

            for player_id in held {
                self.seats.insert(player_id, session_id);
            }
            self.sessions.insert(session_id, handle);
            info!(
                %session_id,
                snapshot_id = snapshot.snapshot_id,
                version = snapshot.version,
                "session restored from snapshot"
            );
            restored.push(session_id);
        }
        Ok(restored)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&SessionHandle<R>> {
        self.sessions.get(&session_id)
    }

    /// The live session `player_id` is seated in.
    pub fn session_of(&self, player_id: &PlayerId) -> Option<SessionId> {
        self.seats.get(player_id).copied()
    }

    /// The handle of the session `player_id` is seated in.
    ///
    /// # Errors
    /// [`SessionError::NotSeated`] or, if the session is gone,
    /// [`SessionError::NotFound`].
    pub fn handle_for(&self, player_id: &PlayerId) -> Result<SessionHandle<R>, SessionError> {
        let session_id = self
            .session_of(player_id)
            .ok_or_else(|| SessionError::NotSeated(player_id.clone()))?;
        self.sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Frees `player_id` once its seat in `session_id` is gone for good.
    /// A seat the player has since taken in another session is kept.
    pub fn release(&mut self, player_id: &PlayerId, session_id: SessionId) -> bool {
        if self.seats.get(player_id) != Some(&session_id) {
            return false;
        }
        self.seats.remove(player_id);
        debug!(%session_id, %player_id, "seat released");
        true
    }

    /// Forgets a closed session and frees its seats.
    pub fn remove(&mut self, session_id: SessionId) -> Option<SessionHandle<R>> {
        let handle = self.sessions.remove(&session_id)?;
        self.seats.retain(|_, id| *id != session_id);
        info!(%session_id, "session removed");
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Stops every session, each after a final snapshot.
    pub async fn shutdown_all(&mut self) {
        for (session_id, handle) in self.sessions.drain() {
            if let Err(e) = handle.shutdown().await {
                warn!(%session_id, error = %e, "session did not shut down cleanly");
            }
        }
        self.seats.clear();
    }

    fn seats_of(&self, session_id: SessionId) -> usize {
        self.seats.values().filter(|id| **id == session_id).count()
    }
}
