//! `TesseraServer` builder and server loop.
//!
//! This is the entry point for running a Tessera game server. It ties
//! together all the layers: transport → protocol → lobby → sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tessera_game::{RuleEngine, SeatSender, SessionEvent, SessionRegistry};
use tessera_lobby::LobbyCoordinator;
use tessera_protocol::{Codec, JsonCodec, PlayerId, SessionId};
use tessera_recovery::{Authenticator, ClaimedIdentity};
use tessera_snapshot::FileSnapshotStore;
use tessera_timer::Cadence;
use tessera_transport::{HeartbeatConfig, Transport, WebSocketTransport};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::TesseraError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;

/// The live connection of one player.
pub(crate) struct Link<S> {
    pub(crate) conn_id: u64,
    pub(crate) game: SeatSender<S>,
    /// Fires when a newer connection of the same player takes over.
    kick: Option<oneshot::Sender<()>>,
}

impl<S> Link<S> {
    pub(crate) fn new(conn_id: u64, game: SeatSender<S>, kick: oneshot::Sender<()>) -> Self {
        Self {
            conn_id,
            game,
            kick: Some(kick),
        }
    }
}

/// Shared server state passed to each connection handler task.
///
/// Locks are taken one at a time, never nested, except on the lobby start
/// path which holds `lobby` while briefly taking `links` and then
/// `sessions`. Nothing takes `lobby` while holding either of the others.
pub(crate) struct ServerState<R: RuleEngine, A: Authenticator, C: Codec> {
    pub(crate) lobby: Mutex<LobbyCoordinator>,
    pub(crate) sessions: Mutex<SessionRegistry<R>>,
    pub(crate) links: Mutex<HashMap<PlayerId, Link<R::State>>>,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) handshake_timeout: Duration,
    pub(crate) started: Instant,
}

impl<R: RuleEngine, A: Authenticator, C: Codec> ServerState<R, A, C> {
    /// Milliseconds since the server started; the `timestamp` of every
    /// outgoing envelope.
    pub(crate) fn clock_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Makes `link` the player's connection and tells the previous one, if
    /// any, that it has been superseded.
    pub(crate) async fn register(&self, player_id: PlayerId, link: Link<R::State>) {
        let previous = self.links.lock().await.insert(player_id.clone(), link);
        if let Some(mut old) = previous {
            info!(%player_id, old_conn = old.conn_id, "connection superseded");
            if let Some(kick) = old.kick.take() {
                let _ = kick.send(());
            }
        }
    }

    /// Forgets the player's connection if it is still `conn_id`.
    pub(crate) async fn unregister(&self, player_id: &PlayerId, conn_id: u64) {
        let mut links = self.links.lock().await;
        if links.get(player_id).is_some_and(|l| l.conn_id == conn_id) {
            links.remove(player_id);
        }
    }

    /// Frees a player whose seat in `session_id` is gone for good, so it
    /// can open or join another lobby. Takes `lobby` then `sessions`, one
    /// at a time.
    pub(crate) async fn release_seat(&self, player_id: &PlayerId, session_id: SessionId) {
        let lobby = self.lobby.lock().await.release(player_id, session_id);
        let seat = self.sessions.lock().await.release(player_id, session_id);
        if lobby.is_some() || seat {
            debug!(%player_id, %session_id, ?lobby, "player released");
        }
    }

    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SeatReleased {
                session_id,
                player_id,
                ..
            } => self.release_seat(&player_id, session_id).await,
            SessionEvent::Closed {
                session_id,
                lobby_id,
                result,
                ..
            } => {
                self.sessions.lock().await.remove(session_id);
                let reason = result
                    .map(|r| r.reason)
                    .unwrap_or_else(|| "session closed".to_string());
                info!(%session_id, %reason, "session closed");

                if let Some(lobby_id) = lobby_id {
                    if let Err(e) = self.lobby.lock().await.finish(lobby_id, &reason) {
                        debug!(%lobby_id, error = %e, "no lobby to finish");
                    }
                }
            }
        }
    }

    async fn sweep_lobbies(&self) {
        let expired = self.lobby.lock().await.expire_idle(Instant::now());
        if !expired.is_empty() {
            info!(count = expired.len(), "idle lobbies closed");
        }
    }
}

/// Builder for configuring and starting a Tessera server.
///
/// # Example
///
/// ```rust,ignore
/// use tessera::prelude::*;
///
/// let server = TesseraServerBuilder::new()
///     .config(ServerConfig::load(path).await?)
///     .build(AzulRules::new(), ClaimedIdentity)
///     .await?;
/// server.run().await
/// ```
pub struct TesseraServerBuilder {
    config: ServerConfig,
}

impl TesseraServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.server.bind_address = addr.to_string();
        self
    }

    /// Validates the configuration, opens the snapshot store (restoring
    /// unfinished sessions if configured) and binds the listener.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    ///
    /// # Errors
    /// [`TesseraError::Config`] for an invalid configuration, a snapshot
    /// error if the store cannot be opened or read, or a transport error if
    /// the address cannot be bound.
    pub async fn build<R: RuleEngine, A: Authenticator>(
        self,
        rules: R,
        auth: A,
    ) -> Result<TesseraServer<R, A, JsonCodec>, TesseraError> {
        let config = self.config;
        config.validate()?;

        let store = match config.snapshot_store() {
            Some(store_config) => Some(Arc::new(FileSnapshotStore::open(store_config).await?)),
            None => None,
        };
        let (mut registry, events) =
            SessionRegistry::new(Arc::new(rules), config.session(), store);
        if config.snapshots.restore_on_start {
            let restored = registry.restore_all().await?;
            info!(count = restored.len(), "sessions restored");
        }

        let transport = WebSocketTransport::bind(&config.server.bind_address).await?;

        let state = Arc::new(ServerState {
            lobby: Mutex::new(LobbyCoordinator::new(config.lobby())),
            sessions: Mutex::new(registry),
            links: Mutex::new(HashMap::new()),
            auth,
            codec: JsonCodec,
            heartbeat: config.heartbeat(),
            handshake_timeout: config.handshake_timeout(),
            started: Instant::now(),
        });

        Ok(TesseraServer {
            transport,
            state,
            events,
            sweep_interval: config.lobby_sweep_interval(),
        })
    }

    /// [`build`](Self::build) with the default identity hook.
    pub async fn build_default<R: RuleEngine>(
        self,
        rules: R,
    ) -> Result<TesseraServer<R, ClaimedIdentity, JsonCodec>, TesseraError> {
        self.build(rules, ClaimedIdentity).await
    }
}

impl Default for TesseraServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Tessera game server.
///
/// Made by [`TesseraServerBuilder::build`]. Call [`run()`](Self::run) or
/// [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct TesseraServer<R: RuleEngine, A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<R, A, C>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    sweep_interval: Duration,
}

impl<R, A, C> TesseraServer<R, A, C>
where
    R: RuleEngine,
    A: Authenticator,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server until the process is terminated.
    pub async fn run(self) -> Result<(), TesseraError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then saves a
    /// `SHUTDOWN` snapshot of every live session and stops them.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), TesseraError> {
        info!(addr = ?self.local_addr().ok(), "Tessera server running");

        let housekeeping = tokio::spawn(housekeeping(
            Arc::clone(&self.state),
            self.events,
            self.sweep_interval,
        ));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }

        info!("Tessera server shutting down");
        housekeeping.abort();
        self.state.sessions.lock().await.shutdown_all().await;
        if let Err(e) = self.transport.shutdown().await {
            warn!(error = %e, "transport shutdown failed");
        }
        Ok(())
    }
}

/// Reaps closed sessions and sweeps idle lobbies.
async fn housekeeping<R: RuleEngine, A: Authenticator, C: Codec>(
    state: Arc<ServerState<R, A, C>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    sweep_interval: Duration,
) {
    let mut sweep = Cadence::new("lobby-sweep", sweep_interval, sweep_interval / 10);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => state.on_session_event(event).await,
                None => break,
            },
            _ = sweep.tick() => state.sweep_lobbies().await,
        }
    }
}
