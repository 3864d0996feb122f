//! Per-connection handler: handshake, identity, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Resolve identity → PlayerId, superseding any older connection
//!   3. Send HandshakeAck and the lobby list
//!   4. Loop: inbound frames, lobby and session traffic, heartbeat

use std::sync::Arc;

use tessera_game::{RuleEngine, SeatAttachment, SessionError, SessionHandle};
use tessera_protocol::{
    Codec, Envelope, GameMessage, LobbyId, LobbyMessage, Payload, PlayerId, ProtocolError,
    PROTOCOL_VERSION, SessionId, SystemMessage,
};
use tessera_recovery::{Authenticator, RecoveryError};
use tessera_transport::{Connection, Heartbeat, Pulse, WebSocketConnection};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::TesseraError;
use crate::server::{Link, ServerState};

/// Drop guard that releases a player's connection when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async locks.
struct ConnectionGuard<R: RuleEngine, A: Authenticator, C: Codec> {
    player_id: PlayerId,
    conn_id: u64,
    lobby: mpsc::UnboundedSender<LobbyMessage>,
    state: Arc<ServerState<R, A, C>>,
}

impl<R: RuleEngine, A: Authenticator, C: Codec> Drop for ConnectionGuard<R, A, C> {
    fn drop(&mut self) {
        let player_id = self.player_id.clone();
        let conn_id = self.conn_id;
        let lobby = self.lobby.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.unregister(&player_id, conn_id).await;
            state
                .lobby
                .lock()
                .await
                .disconnect(&player_id, &lobby, Instant::now());

            let handle = {
                let sessions = state.sessions.lock().await;
                sessions
                    .session_of(&player_id)
                    .and_then(|id| sessions.get(id).cloned())
            };
            if let Some(handle) = handle {
                let _ = handle.detach(player_id, conn_id).await;
            }
        });
    }
}

/// Whether the message loop goes on after a frame.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One identified connection.
struct Peer<'a, R: RuleEngine, A: Authenticator, C: Codec> {
    conn: &'a WebSocketConnection,
    state: &'a Arc<ServerState<R, A, C>>,
    player_id: PlayerId,
    name: String,
    conn_id: u64,
    game_tx: mpsc::UnboundedSender<GameMessage<R::State>>,
    /// The session this connection is attached to, learned from its `JOIN`.
    session: Option<SessionId>,
    seq: u64,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<R, A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<R, A, C>>,
) -> Result<(), TesseraError>
where
    R: RuleEngine,
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let (player_id, name) = perform_handshake(&conn, &state).await?;
    info!(%conn_id, %player_id, "player identified");

    let (lobby_tx, mut lobby_rx) = mpsc::unbounded_channel();
    let (game_tx, mut game_rx) = mpsc::unbounded_channel();
    let (kick_tx, mut kicked) = oneshot::channel();

    // subscribe before taking over, so the superseded connection's cleanup
    // no longer owns the lobby subscription
    state
        .lobby
        .lock()
        .await
        .subscribe(player_id.clone(), lobby_tx.clone());
    state
        .register(
            player_id.clone(),
            Link::new(conn_id.into_inner(), game_tx.clone(), kick_tx),
        )
        .await;
    let _guard = ConnectionGuard {
        player_id: player_id.clone(),
        conn_id: conn_id.into_inner(),
        lobby: lobby_tx,
        state: Arc::clone(&state),
    };

    let mut peer = Peer {
        conn: &conn,
        state: &state,
        player_id,
        name,
        conn_id: conn_id.into_inner(),
        game_tx,
        session: None,
        seq: 1,
    };

    // --- Step 2: Message loop ---
    let mut heartbeat = Heartbeat::new(state.heartbeat);
    loop {
        tokio::select! {
            biased;

            _ = &mut kicked => {
                peer.send(Payload::System(SystemMessage::Disconnect {
                    reason: "superseded by a newer connection".into(),
                }))
                .await?;
                let _ = conn.close().await;
                break;
            }

            Some(msg) = lobby_rx.recv() => peer.send(Payload::Lobby(msg)).await?,

            Some(msg) = game_rx.recv() => {
                if let GameMessage::Join { player_id, session_id, .. } = &msg {
                    if *player_id == peer.player_id {
                        peer.session = Some(*session_id);
                    }
                }
                peer.send(Payload::Game(msg)).await?;
            }

            frame = conn.recv() => match frame {
                Ok(Some(data)) => {
                    if peer.handle_frame(&data).await? == Flow::Close {
                        break;
                    }
                }
                Ok(None) => {
                    info!(player_id = %peer.player_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    debug!(player_id = %peer.player_id, error = %e, "recv error");
                    break;
                }
            },

            _ = heartbeat.tick() => match heartbeat.check(conn.last_activity()) {
                Pulse::Probe => conn.ping().await?,
                Pulse::Lost { silent_for } => {
                    info!(player_id = %peer.player_id, ?silent_for, "connection lost");
                    break;
                }
            },
        }
    }

    // _guard drops here → the seat is detached and the lobby told.
    Ok(())
}

/// Performs the initial handshake: receive Handshake, validate, resolve
/// identity, send Ack.
async fn perform_handshake<R, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<R, A, C>>,
) -> Result<(PlayerId, String), TesseraError>
where
    R: RuleEngine,
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope<R::State> = state.codec.decode(&data)?;

    let (version, claimed, name) = match envelope.payload {
        Payload::System(SystemMessage::Handshake {
            version,
            player_id,
            name,
        }) => (version, player_id, name),
        _ => {
            send_error(conn, state, 400, "expected Handshake", 0).await?;
            return Err(
                ProtocolError::InvalidMessage("first message must be Handshake".into()).into(),
            );
        }
    };

    if version != PROTOCOL_VERSION {
        let err = ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: version,
        };
        send_error(conn, state, 400, &err.to_string(), 0).await?;
        return Err(err.into());
    }

    let player_id = match state.auth.authenticate(&claimed, &name).await {
        Ok(pid) => pid,
        Err(e) => {
            send_error(conn, state, 401, &e.to_string(), 0).await?;
            return Err(e.into());
        }
    };

    let ack: Envelope<R::State> = Envelope {
        seq: 0,
        timestamp: state.clock_ms(),
        payload: Payload::System(SystemMessage::HandshakeAck {
            player_id: player_id.clone(),
            server_time: state.clock_ms(),
        }),
    };
    conn.send(&state.codec.encode(&ack)?).await?;

    let name = if name.trim().is_empty() {
        player_id.to_string()
    } else {
        name
    };
    Ok((player_id, name))
}

impl<R, A, C> Peer<'_, R, A, C>
where
    R: RuleEngine,
    A: Authenticator,
    C: Codec,
{
    async fn send(&mut self, payload: Payload<R::State>) -> Result<(), TesseraError> {
        let envelope = Envelope {
            seq: next_seq(&mut self.seq),
            timestamp: self.state.clock_ms(),
            payload,
        };
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(&mut self, code: u16, message: String) -> Result<(), TesseraError> {
        self.send(Payload::System(SystemMessage::Error { code, message }))
            .await
    }

    /// Decodes and dispatches one inbound frame. A frame that does not
    /// decode is dropped; the connection stays up.
    async fn handle_frame(&mut self, data: &[u8]) -> Result<Flow, TesseraError> {
        let envelope: Envelope<R::State> = match self.state.codec.decode(data) {
            Ok(env) => env,
            Err(e) => {
                debug!(player_id = %self.player_id, error = %e, "dropping malformed frame");
                self.send_error(400, format!("malformed message: {e}")).await?;
                return Ok(Flow::Continue);
            }
        };

        match envelope.payload {
            Payload::System(SystemMessage::Disconnect { reason }) => {
                info!(player_id = %self.player_id, %reason, "client disconnected");
                return Ok(Flow::Close);
            }
            Payload::System(_) => {
                debug!(player_id = %self.player_id, "ignoring unexpected system message");
            }
            Payload::Lobby(msg) => self.handle_lobby_message(msg).await?,
            Payload::Game(msg) => self.handle_game_message(msg).await?,
        }
        Ok(Flow::Continue)
    }

    // -- lobby ------------------------------------------------------------

    async fn handle_lobby_message(&mut self, msg: LobbyMessage) -> Result<(), TesseraError> {
        let result = match msg {
            LobbyMessage::LobbyCreate { name } => self.create_lobby(name).await,
            LobbyMessage::PlayerJoined { lobby_id } => self.join_lobby(lobby_id).await,
            LobbyMessage::PlayerLeft { lobby_id } => self
                .state
                .lobby
                .lock()
                .await
                .leave(lobby_id, &self.player_id, Instant::now())
                .map(|_| ())
                .map_err(TesseraError::from),
            LobbyMessage::PlayerReady { lobby_id, ready } => self
                .state
                .lobby
                .lock()
                .await
                .set_ready(lobby_id, &self.player_id, ready, Instant::now())
                .map(|_| ())
                .map_err(TesseraError::from),
            LobbyMessage::GameStart { lobby_id, .. } => self.start_game(lobby_id).await,
            other => {
                debug!(player_id = %self.player_id, ?other, "ignoring server-only lobby message");
                Ok(())
            }
        };

        // refusals go back to the requester only
        if let Err(e) = result {
            debug!(player_id = %self.player_id, error = %e, "lobby request refused");
            let lobby = {
                let coordinator = self.state.lobby.lock().await;
                coordinator
                    .lobby_of(&self.player_id)
                    .and_then(|id| coordinator.get(id).cloned())
            };
            self.send(Payload::Lobby(LobbyMessage::Error {
                message: e.to_string(),
                lobby,
            }))
            .await?;
        }
        Ok(())
    }

    async fn create_lobby(&self, name: String) -> Result<(), TesseraError> {
        self.ensure_not_playing().await?;
        self.state.lobby.lock().await.create(
            self.player_id.clone(),
            self.name.clone(),
            name,
            Instant::now(),
        )?;
        Ok(())
    }

    async fn join_lobby(&self, lobby_id: LobbyId) -> Result<(), TesseraError> {
        self.ensure_not_playing().await?;
        self.state.lobby.lock().await.join(
            lobby_id,
            self.player_id.clone(),
            self.name.clone(),
            Instant::now(),
        )?;
        Ok(())
    }

    /// A player still seated in a live game cannot open or join a lobby.
    async fn ensure_not_playing(&self) -> Result<(), TesseraError> {
        match self.state.sessions.lock().await.session_of(&self.player_id) {
            Some(session_id) => {
                Err(SessionError::AlreadySeated(self.player_id.clone(), session_id).into())
            }
            None => Ok(()),
        }
    }

    /// Promotes the lobby to a session. Every seat must have a live
    /// connection; otherwise, or if the session cannot be created, the
    /// lobby goes back to waiting.
    async fn start_game(&self, lobby_id: LobbyId) -> Result<(), TesseraError> {
        let mut lobby = self.state.lobby.lock().await;
        let order = lobby.start(lobby_id, &self.player_id)?;

        let seats: Result<Vec<_>, PlayerId> = {
            let links = self.state.links.lock().await;
            order
                .iter()
                .map(|player_id| {
                    links
                        .get(player_id)
                        .map(|link| SeatAttachment {
                            player_id: player_id.clone(),
                            conn_id: link.conn_id,
                            sender: link.game.clone(),
                        })
                        .ok_or_else(|| player_id.clone())
                })
                .collect()
        };
        let seats = match seats {
            Ok(seats) => seats,
            Err(missing) => {
                lobby.abort_start(lobby_id, Instant::now())?;
                return Err(RecoveryError::NotConnected(missing).into());
            }
        };

        let created = self
            .state
            .sessions
            .lock()
            .await
            .create(Some(lobby_id), seats);
        match created {
            Ok(handle) => {
                lobby.promote(lobby_id, handle.session_id())?;
                Ok(())
            }
            Err(e) => {
                lobby.abort_start(lobby_id, Instant::now())?;
                Err(e.into())
            }
        }
    }

    // -- game -------------------------------------------------------------

    /// Routes a game message to the session. The connection's identity is
    /// used throughout; player ids inside client messages are not trusted.
    async fn handle_game_message(
        &mut self,
        msg: GameMessage<R::State>,
    ) -> Result<(), TesseraError> {
        let player_id = self.player_id.clone();
        let result = match msg {
            GameMessage::Join {
                session_id, token, ..
            } => self.attach(session_id, token).await,
            GameMessage::Ping { .. } => {
                return self
                    .send(Payload::Game(GameMessage::Pong { player_id }))
                    .await;
            }
            GameMessage::Move { mv, .. } => match self.session().await {
                Ok(handle) => match handle.submit(player_id, mv).await {
                    Ok(version) => {
                        debug!(player_id = %self.player_id, version, "move accepted");
                        Ok(())
                    }
                    // the session already told the submitter
                    Err(SessionError::Rejected(_)) => Ok(()),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
            GameMessage::Chat { text, .. } => match self.session().await {
                Ok(handle) => handle.chat(player_id, text).await,
                Err(e) => Err(e),
            },
            GameMessage::ScoreReconciliationRequest { .. } => match self.session().await {
                Ok(handle) => handle.request_reconciliation(player_id).await,
                Err(e) => Err(e),
            },
            GameMessage::Leave { .. } => self.leave().await,
            other => {
                debug!(player_id = %self.player_id, kind = other.kind(), "ignoring server-only game message");
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(player_id = %self.player_id, error = %e, "game request refused");
            self.send_error(status_code(&e), e.to_string()).await?;
        }
        Ok(())
    }

    /// Reclaims this player's seat in `session_id` with its token.
    async fn attach(
        &mut self,
        session_id: SessionId,
        token: Option<String>,
    ) -> Result<(), SessionError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(RecoveryError::InvalidToken)?;
        let handle = self
            .state
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))?;

        let rejoin = handle
            .attach(self.player_id.clone(), self.conn_id, token, self.game_tx.clone())
            .await?;
        info!(player_id = %self.player_id, %session_id, ?rejoin, "seat reclaimed");
        self.session = Some(session_id);
        Ok(())
    }

    /// Leaves the session for good and frees the player for new lobbies.
    async fn leave(&mut self) -> Result<(), SessionError> {
        let handle = self.session().await?;
        handle.leave(self.player_id.clone()).await?;
        if let Some(session_id) = self.session.take() {
            self.state.release_seat(&self.player_id, session_id).await;
        }
        Ok(())
    }

    /// The session this connection is attached to.
    async fn session(&self) -> Result<SessionHandle<R>, SessionError> {
        let session_id = self
            .session
            .ok_or_else(|| SessionError::NotSeated(self.player_id.clone()))?;
        self.state
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }
}

/// HTTP-style code for a refused game request.
fn status_code(e: &SessionError) -> u16 {
    match e {
        SessionError::NotFound(_) | SessionError::NotSeated(_) => 404,
        SessionError::Recovery(RecoveryError::InvalidToken | RecoveryError::AuthFailed(_)) => 401,
        SessionError::Recovery(_) | SessionError::AlreadySeated(..) => 409,
        SessionError::Unavailable(_) => 410,
        _ => 400,
    }
}

/// Sends a SystemMessage::Error envelope during the handshake.
async fn send_error<R, A, C>(
    conn: &WebSocketConnection,
    state: &ServerState<R, A, C>,
    code: u16,
    message: &str,
    seq: u64,
) -> Result<(), TesseraError>
where
    R: RuleEngine,
    A: Authenticator,
    C: Codec,
{
    let envelope: Envelope<R::State> = Envelope {
        seq,
        timestamp: state.clock_ms(),
        payload: Payload::System(SystemMessage::Error {
            code,
            message: message.to_string(),
        }),
    };
    let bytes = state.codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_seq_counts_up() {
        let mut seq = 1;
        assert_eq!(next_seq(&mut seq), 1);
        assert_eq!(next_seq(&mut seq), 2);
        assert_eq!(seq, 3);
    }

    #[test]
    fn test_status_codes() {
        let pid = PlayerId::from("ana");
        assert_eq!(status_code(&SessionError::NotSeated(pid.clone())), 404);
        assert_eq!(
            status_code(&SessionError::Recovery(RecoveryError::InvalidToken)),
            401
        );
        assert_eq!(
            status_code(&SessionError::Recovery(RecoveryError::Failed(pid.clone()))),
            409
        );
        assert_eq!(
            status_code(&SessionError::AlreadySeated(pid, SessionId(1))),
            409
        );
        assert_eq!(
            status_code(&SessionError::BelowMinPlayers { min: 2, have: 1 }),
            400
        );
    }
}
