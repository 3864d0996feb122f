//! Client runtime: the player's side of the protocol.
//!
//! [`GameClient::connect`] dials the server, performs the handshake and
//! spawns a background driver task. The driver owns the connection: it
//! decodes inbound frames, runs the heartbeat, tracks scores, and when the
//! connection is lost it redials with linear backoff and reclaims the seat
//! with the reconnect token the server handed out in `JOIN`.
//!
//! Everything the UI needs arrives as a [`ClientEvent`] on the receiver
//! returned by `connect`; hand it to a [`Presentation`](crate::Presentation)
//! to dispatch onto sink callbacks.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tessera_protocol::{
    Codec, Envelope, GameMessage, JsonCodec, LobbyId, LobbyMessage, Move, PROTOCOL_VERSION,
    Payload, PlayerId, ProtocolError, SessionId, SystemMessage,
};
use tessera_transport::{
    ClientConnection, Connection, ConnectPolicy, Heartbeat, HeartbeatConfig, Pulse,
    TransportError, connect, connect_with_retry,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::TesseraError;
use crate::tracker::ScoreTracker;

/// Where the client's connection stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// The connection was lost; redialing.
    Reconnecting { attempt: u32 },
    /// Closed by [`GameClient::disconnect`].
    Disconnected,
    /// Closed by the server, e.g. superseded by a newer connection.
    Closed(String),
    /// Every reconnect attempt failed.
    Failed(String),
}

/// Something the UI should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent<S> {
    Status(ConnectionStatus),
    Lobby(LobbyMessage),
    Game(GameMessage<S>),
    /// A request was refused by the server.
    Error { code: u16, message: String },
}

/// Client settings. Built in code; nothing is read from disk.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` or a full `ws://` URL.
    pub address: String,
    pub player_id: PlayerId,
    pub name: String,
    pub connect: ConnectPolicy,
    pub heartbeat: HeartbeatConfig,
    pub handshake_timeout: Duration,
    /// Score drift tolerated before asking the server for history.
    pub score_tolerance: i32,
}

impl ClientConfig {
    pub fn new(
        address: impl Into<String>,
        player_id: impl Into<PlayerId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            player_id: player_id.into(),
            name: name.into(),
            connect: ConnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            score_tolerance: 5,
        }
    }
}

/// Handle to a connected client.
///
/// Requests are queued to the driver task and go out in call order. While
/// the driver is reconnecting they wait in the queue.
pub struct GameClient<S> {
    player_id: PlayerId,
    commands: mpsc::UnboundedSender<Payload<S>>,
    cancel: watch::Sender<bool>,
    status: watch::Receiver<ConnectionStatus>,
    scores: watch::Receiver<BTreeMap<PlayerId, i32>>,
    driver: JoinHandle<()>,
}

impl<S> GameClient<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Dials the server with bounded retry and performs the handshake.
    ///
    /// # Errors
    /// [`TransportError::ConnectionFailed`] once every attempt failed, or a
    /// protocol error if the server refuses the handshake.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent<S>>), TesseraError> {
        let started = Instant::now();
        let conn = connect_with_retry(&config.address, &config.connect).await?;
        let player_id = handshake::<S>(&conn, &config, started).await?;
        info!(%player_id, address = %config.address, "connected");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let (scores_tx, scores_rx) = watch::channel(BTreeMap::new());

        let _ = events_tx.send(ClientEvent::Status(ConnectionStatus::Connected));

        let driver = Driver {
            tracker: ScoreTracker::new(config.score_tolerance),
            config,
            player_id: player_id.clone(),
            conn,
            codec: JsonCodec,
            commands: commands_rx,
            cancel: cancel_rx,
            events: events_tx,
            status: status_tx,
            scores: scores_tx,
            seat: None,
            reconciling: false,
            seq: 1,
            started,
        };
        let driver = tokio::spawn(driver.run());

        Ok((
            Self {
                player_id,
                commands: commands_tx,
                cancel: cancel_tx,
                status: status_rx,
                scores: scores_rx,
                driver,
            },
            events_rx,
        ))
    }

    /// The identity the server acknowledged.
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Locally tracked score totals of the current session.
    pub fn scores(&self) -> BTreeMap<PlayerId, i32> {
        self.scores.borrow().clone()
    }

    pub fn create_lobby(&self, name: impl Into<String>) -> Result<(), TesseraError> {
        self.lobby(LobbyMessage::LobbyCreate { name: name.into() })
    }

    pub fn join_lobby(&self, lobby_id: LobbyId) -> Result<(), TesseraError> {
        self.lobby(LobbyMessage::PlayerJoined { lobby_id })
    }

    pub fn leave_lobby(&self, lobby_id: LobbyId) -> Result<(), TesseraError> {
        self.lobby(LobbyMessage::PlayerLeft { lobby_id })
    }

    pub fn set_ready(&self, lobby_id: LobbyId, ready: bool) -> Result<(), TesseraError> {
        self.lobby(LobbyMessage::PlayerReady { lobby_id, ready })
    }

    /// Host only.
    pub fn start_game(&self, lobby_id: LobbyId) -> Result<(), TesseraError> {
        self.lobby(LobbyMessage::GameStart {
            lobby_id,
            session_id: None,
            seats: Vec::new(),
        })
    }

    pub fn submit(&self, mv: Move) -> Result<(), TesseraError> {
        self.game(GameMessage::Move {
            player_id: self.player_id.clone(),
            mv,
        })
    }

    pub fn chat(&self, text: impl Into<String>) -> Result<(), TesseraError> {
        self.game(GameMessage::Chat {
            player_id: self.player_id.clone(),
            text: text.into(),
        })
    }

    /// Gives up the seat for good; after `GAME_END` this is the
    /// acknowledgment.
    pub fn leave_game(&self) -> Result<(), TesseraError> {
        self.game(GameMessage::Leave {
            player_id: self.player_id.clone(),
        })
    }

    /// Asks for this seat's score history regardless of drift.
    pub fn request_reconciliation(&self) -> Result<(), TesseraError> {
        self.game(GameMessage::ScoreReconciliationRequest {
            player_id: self.player_id.clone(),
        })
    }

    /// Closes the connection and stops the driver, abandoning any reconnect
    /// in progress.
    pub async fn disconnect(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.driver.await {
            warn!(error = %e, "client driver panicked");
        }
    }

    fn lobby(&self, msg: LobbyMessage) -> Result<(), TesseraError> {
        self.queue(Payload::Lobby(msg))
    }

    fn game(&self, msg: GameMessage<S>) -> Result<(), TesseraError> {
        self.queue(Payload::Game(msg))
    }

    fn queue(&self, payload: Payload<S>) -> Result<(), TesseraError> {
        self.commands
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed("client stopped".into()).into())
    }
}

/// Sends the handshake and waits for the acknowledgment. Returns the
/// identity the server settled on.
async fn handshake<S>(
    conn: &ClientConnection,
    config: &ClientConfig,
    started: Instant,
) -> Result<PlayerId, TesseraError>
where
    S: Serialize + DeserializeOwned,
{
    let codec = JsonCodec;
    let hello: Envelope<S> = Envelope {
        seq: 0,
        timestamp: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        payload: Payload::System(SystemMessage::Handshake {
            version: PROTOCOL_VERSION,
            player_id: config.player_id.clone(),
            name: config.name.clone(),
        }),
    };
    conn.send(&codec.encode(&hello)?).await?;

    let data = match tokio::time::timeout(config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed during handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let reply: Envelope<S> = codec.decode(&data)?;
    match reply.payload {
        Payload::System(SystemMessage::HandshakeAck { player_id, .. }) => Ok(player_id),
        Payload::System(SystemMessage::Error { code, message }) => Err(
            ProtocolError::InvalidMessage(format!("handshake refused ({code}): {message}")).into(),
        ),
        _ => Err(ProtocolError::InvalidMessage("expected HandshakeAck".into()).into()),
    }
}

/// Why a connection stopped being served.
enum Ended {
    /// Voluntary disconnect, or the handle was dropped.
    Cancelled,
    /// The server told us to go away.
    Closed(String),
    Lost(String),
}

struct Driver<S> {
    config: ClientConfig,
    player_id: PlayerId,
    conn: ClientConnection,
    codec: JsonCodec,
    commands: mpsc::UnboundedReceiver<Payload<S>>,
    cancel: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ClientEvent<S>>,
    status: watch::Sender<ConnectionStatus>,
    scores: watch::Sender<BTreeMap<PlayerId, i32>>,
    tracker: ScoreTracker,
    /// Seat to reclaim after a reconnect.
    seat: Option<(SessionId, Option<String>)>,
    /// A reconciliation request is outstanding.
    reconciling: bool,
    seq: u64,
    started: Instant,
}

impl<S> Driver<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn run(mut self) {
        loop {
            match self.serve().await {
                Ended::Cancelled => {
                    self.set_status(ConnectionStatus::Disconnected);
                    break;
                }
                Ended::Closed(reason) => {
                    info!(player_id = %self.player_id, %reason, "closed by server");
                    self.set_status(ConnectionStatus::Closed(reason));
                    break;
                }
                Ended::Lost(reason) => {
                    warn!(player_id = %self.player_id, %reason, "connection lost");
                    let _ = self.conn.close().await;
                    match self.reconnect().await {
                        Ok(true) => continue,
                        Ok(false) => {
                            self.set_status(ConnectionStatus::Disconnected);
                            break;
                        }
                        Err(e) => {
                            warn!(player_id = %self.player_id, error = %e, "reconnect failed");
                            self.set_status(ConnectionStatus::Failed(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
        let _ = self.conn.close().await;
        debug!(player_id = %self.player_id, "client driver stopped");
    }

    /// Runs one connection until it ends.
    async fn serve(&mut self) -> Ended {
        let mut heartbeat = Heartbeat::new(self.config.heartbeat);
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.changed() => {
                    let _ = self
                        .send(Payload::System(SystemMessage::Disconnect {
                            reason: "client disconnect".into(),
                        }))
                        .await;
                    return Ended::Cancelled;
                }

                command = self.commands.recv() => match command {
                    Some(payload) => {
                        self.note_outgoing(&payload);
                        if let Err(e) = self.send(payload).await {
                            return Ended::Lost(e.to_string());
                        }
                    }
                    None => return Ended::Cancelled,
                },

                frame = self.conn.recv() => match frame {
                    Ok(Some(data)) => {
                        if let Some(ended) = self.dispatch(&data).await {
                            return ended;
                        }
                    }
                    Ok(None) => return Ended::Lost("closed by peer".into()),
                    Err(e) => return Ended::Lost(e.to_string()),
                },

                _ = heartbeat.tick() => match heartbeat.check(self.conn.last_activity()) {
                    Pulse::Probe => {
                        if let Err(e) = self.conn.ping().await {
                            return Ended::Lost(e.to_string());
                        }
                    }
                    Pulse::Lost { silent_for } => {
                        return Ended::Lost(TransportError::ConnectionLost { silent_for }.to_string());
                    }
                },
            }
        }
    }

    /// Redials with linear backoff. `Ok(false)` if cancelled meanwhile.
    async fn reconnect(&mut self) -> Result<bool, TesseraError> {
        let policy = self.config.connect;
        let attempts = policy.attempts();
        let mut last = None;

        for attempt in 1..=attempts {
            self.set_status(ConnectionStatus::Reconnecting { attempt });
            let dialed = tokio::select! {
                _ = self.cancel.changed() => return Ok(false),
                dialed = dial::<S>(&self.config, self.started) => dialed,
            };
            match dialed {
                Ok(conn) => {
                    self.conn = conn;
                    self.reconciling = false;
                    self.set_status(ConnectionStatus::Connected);
                    info!(player_id = %self.player_id, attempt, "reconnected");
                    self.rejoin().await;
                    return Ok(true);
                }
                Err(e) => {
                    debug!(player_id = %self.player_id, attempt, error = %e, "reconnect attempt failed");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.changed() => return Ok(false),
                    _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
                }
            }
        }

        let last = match last {
            Some(TesseraError::Transport(e)) => e,
            Some(other) => TransportError::ConnectionClosed(other.to_string()),
            None => TransportError::Shutdown,
        };
        Err(TransportError::ConnectionFailed {
            addr: self.config.address.clone(),
            attempts,
            last: Box::new(last),
        }
        .into())
    }

    /// Reclaims the held seat on a fresh connection.
    async fn rejoin(&mut self) {
        let Some((session_id, token)) = self.seat.clone() else {
            return;
        };
        let join = GameMessage::Join {
            player_id: self.player_id.clone(),
            session_id,
            token,
        };
        if let Err(e) = self.send(Payload::Game(join)).await {
            debug!(player_id = %self.player_id, error = %e, "rejoin not sent");
        }
    }

    fn note_outgoing(&mut self, payload: &Payload<S>) {
        if let Payload::Game(GameMessage::Leave { .. }) = payload {
            self.seat = None;
        }
    }

    /// Handles one inbound frame. Returns how the connection ended, if it did.
    async fn dispatch(&mut self, data: &[u8]) -> Option<Ended> {
        let envelope: Envelope<S> = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(player_id = %self.player_id, error = %e, "dropping malformed frame");
                return None;
            }
        };

        match envelope.payload {
            Payload::System(SystemMessage::Disconnect { reason }) => {
                return Some(Ended::Closed(reason));
            }
            Payload::System(SystemMessage::Error { code, message }) => {
                debug!(player_id = %self.player_id, code, %message, "server error");
                self.emit(ClientEvent::Error { code, message });
            }
            Payload::System(_) => {}
            Payload::Lobby(msg) => self.emit(ClientEvent::Lobby(msg)),
            Payload::Game(msg) => {
                self.track(&msg).await;
                self.emit(ClientEvent::Game(msg));
            }
        }
        None
    }

    /// Seat and score bookkeeping for one game message.
    async fn track(&mut self, msg: &GameMessage<S>) {
        match msg {
            GameMessage::Join {
                player_id,
                session_id,
                token,
            } if *player_id == self.player_id => {
                // lobby and game traffic are not ordered with each other, so
                // a new session is recognised by its JOIN, not by GAME_START
                if self.seat.as_ref().map(|(id, _)| id) != Some(session_id) {
                    self.tracker.clear();
                    self.publish_scores();
                }
                self.seat = Some((*session_id, token.clone()));
            }
            GameMessage::ScoreUpdate { event, .. } => {
                self.tracker.apply(event);
                self.publish_scores();
            }
            GameMessage::ScoreSync { scores } => {
                for drift in self.tracker.drift(scores) {
                    if drift.player_id == self.player_id {
                        if !self.reconciling {
                            info!(
                                player_id = %self.player_id,
                                local = drift.local,
                                authoritative = drift.authoritative,
                                "score drift, requesting history"
                            );
                            self.reconciling = true;
                            let request = GameMessage::ScoreReconciliationRequest {
                                player_id: self.player_id.clone(),
                            };
                            if let Err(e) = self.send(Payload::Game(request)).await {
                                debug!(error = %e, "reconciliation request not sent");
                                self.reconciling = false;
                            }
                        }
                    } else {
                        self.tracker.adopt(&drift.player_id, drift.authoritative);
                    }
                }
                self.publish_scores();
            }
            GameMessage::ScoreReconciliationResponse {
                player_id,
                checkpoint,
                events,
            } => {
                self.tracker.replace(player_id, *checkpoint, events.clone());
                if *player_id == self.player_id {
                    self.reconciling = false;
                }
                self.publish_scores();
            }
            GameMessage::GameEnd { scores, .. } => {
                for (player_id, total) in &scores.scores {
                    self.tracker.adopt(player_id, *total);
                }
                self.publish_scores();
            }
            _ => {}
        }
    }

    async fn send(&mut self, payload: Payload<S>) -> Result<(), TesseraError> {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            payload,
        };
        self.seq += 1;
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    fn emit(&self, event: ClientEvent<S>) {
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status.clone());
        self.emit(ClientEvent::Status(status));
    }

    fn publish_scores(&self) {
        self.scores.send_replace(self.tracker.totals().clone());
    }
}

/// One connect attempt followed by the handshake.
async fn dial<S>(config: &ClientConfig, started: Instant) -> Result<ClientConnection, TesseraError>
where
    S: Serialize + DeserializeOwned,
{
    let conn = connect(&config.address, config.connect.connect_timeout).await?;
    handshake::<S>(&conn, config, started).await?;
    Ok(conn)
}
