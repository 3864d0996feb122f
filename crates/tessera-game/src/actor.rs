//! Session actor: one Tokio task that owns a [`SessionCore`].
//!
//! Commands arrive on a bounded mpsc channel, timers come from the core.
//! After every step the actor delivers what the core queued, publishes the
//! new [`SessionRecord`] on a `watch` channel and hands side work (saving,
//! teardown) to the tasks that do it. Nothing else ever touches the core,
//! so every change to a session is serialized here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tessera_protocol::{
    GameMessage, GameResult, LobbyId, Move, PlayerId, Recipient, SessionId, SessionView,
};
use tessera_recovery::Rejoin;
use tessera_snapshot::{FileSnapshotStore, SnapshotMeta, SnapshotTrigger};
use tessera_timer::Cadence;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::persist::{PersistRequest, Snapshotter};
use crate::reconciler::ScoreReconciler;
use crate::{Effect, Rejection, RuleEngine, SessionConfig, SessionCore, SessionError, SessionRecord};

/// Channel that carries a session's messages to one seat's connection.
pub type SeatSender<S> = mpsc::UnboundedSender<GameMessage<S>>;

/// What a session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A seat left, failed to reconnect or was removed while the game goes
    /// on. Its player is no longer seated anywhere.
    SeatReleased {
        session_id: SessionId,
        lobby_id: Option<LobbyId>,
        player_id: PlayerId,
    },
    /// The game ended and every seat acknowledged, or the linger expired.
    Closed {
        session_id: SessionId,
        lobby_id: Option<LobbyId>,
        seats: Vec<PlayerId>,
        result: Option<GameResult>,
    },
}

pub(crate) enum SessionCommand<R: RuleEngine> {
    /// A connection reclaims a seat with its token.
    Attach {
        player_id: PlayerId,
        conn_id: u64,
        token: String,
        sender: SeatSender<R::State>,
        reply: oneshot::Sender<Result<Rejoin, SessionError>>,
    },

    /// A seat's connection closed. Ignored unless `conn_id` is still the
    /// seat's current connection.
    Detach { player_id: PlayerId, conn_id: u64 },

    Submit {
        player_id: PlayerId,
        mv: Move,
        reply: oneshot::Sender<Result<u64, Rejection>>,
    },

    Chat { player_id: PlayerId, text: String },

    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },

    ReconcileRequest { player_id: PlayerId },

    /// Scores recomputed off the gameplay path, at `observed_version`.
    PublishScores {
        observed_version: u64,
        recomputed: BTreeMap<PlayerId, i32>,
    },

    /// Save a final snapshot and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running session. Cheap to clone.
pub struct SessionHandle<R: RuleEngine> {
    session_id: SessionId,
    commands: mpsc::Sender<SessionCommand<R>>,
    record: watch::Receiver<Arc<SessionRecord<R::State>>>,
    persist: Option<mpsc::UnboundedSender<PersistRequest>>,
}

impl<R: RuleEngine> Clone for SessionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id,
            commands: self.commands.clone(),
            record: self.record.clone(),
            persist: self.persist.clone(),
        }
    }
}

impl<R: RuleEngine> SessionHandle<R> {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The last published state of the session.
    pub fn record(&self) -> Arc<SessionRecord<R::State>> {
        self.record.borrow().clone()
    }

    pub fn view(&self) -> SessionView<R::State> {
        self.record.borrow().view.clone()
    }

    pub fn version(&self) -> u64 {
        self.record.borrow().view.version
    }

    /// Follows every published state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionRecord<R::State>>> {
        self.record.clone()
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Reclaims `player_id`'s seat on connection `conn_id`. The seat's
    /// messages go to `sender` from now on.
    pub async fn attach(
        &self,
        player_id: PlayerId,
        conn_id: u64,
        token: String,
        sender: SeatSender<R::State>,
    ) -> Result<Rejoin, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Attach {
            player_id,
            conn_id,
            token,
            sender,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Reports that connection `conn_id` of `player_id` closed.
    pub async fn detach(&self, player_id: PlayerId, conn_id: u64) -> Result<(), SessionError> {
        self.command(SessionCommand::Detach { player_id, conn_id }).await
    }

    /// Submits a move and waits for the verdict. Returns the new version.
    pub async fn submit(&self, player_id: PlayerId, mv: Move) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Submit {
            player_id,
            mv,
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| self.unavailable())??)
    }

    pub async fn chat(&self, player_id: PlayerId, text: String) -> Result<(), SessionError> {
        self.command(SessionCommand::Chat { player_id, text }).await
    }

    pub async fn leave(&self, player_id: PlayerId) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Leave { player_id, reply }).await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn request_reconciliation(&self, player_id: PlayerId) -> Result<(), SessionError> {
        self.command(SessionCommand::ReconcileRequest { player_id })
            .await
    }

    /// Saves a snapshot of the last published state now.
    ///
    /// # Errors
    /// [`SnapshotError::Unavailable`](tessera_snapshot::SnapshotError) when
    /// the session runs without a store.
    pub async fn snapshot(&self, trigger: SnapshotTrigger) -> Result<SnapshotMeta, SessionError> {
        let persist = self
            .persist
            .as_ref()
            .ok_or(tessera_snapshot::SnapshotError::Unavailable)?;
        let (reply, rx) = oneshot::channel();
        persist
            .send(PersistRequest::Save {
                trigger,
                reply: Some(reply),
            })
            .map_err(|_| self.unavailable())?;
        Ok(rx.await.map_err(|_| self.unavailable())??)
    }

    /// Saves a final snapshot and stops the actor. Resolves once it has.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    pub(crate) async fn publish_scores(
        &self,
        observed_version: u64,
        recomputed: BTreeMap<PlayerId, i32>,
    ) -> Result<(), SessionError> {
        self.command(SessionCommand::PublishScores {
            observed_version,
            recomputed,
        })
        .await
    }

    async fn command(&self, cmd: SessionCommand<R>) -> Result<(), SessionError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> SessionError {
        SessionError::Unavailable(self.session_id)
    }
}

/// A seat's live connection.
struct Attached<S> {
    conn_id: u64,
    sender: SeatSender<S>,
}

struct SessionActor<R: RuleEngine> {
    core: SessionCore<R>,
    attached: HashMap<PlayerId, Attached<R::State>>,
    receiver: mpsc::Receiver<SessionCommand<R>>,
    record: watch::Sender<Arc<SessionRecord<R::State>>>,
    persist: Option<mpsc::UnboundedSender<PersistRequest>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stopping: bool,
}

impl<R: RuleEngine> SessionActor<R> {
    async fn run(mut self) {
        let session_id = self.core.id();
        info!(%session_id, "session actor started");

        // the core may have queued its opening messages already
        self.flush();
        while !self.stopping {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        info!(%session_id, "session actor stopped");
                        return;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                key = self.core.next_timer() => {
                    debug!(%session_id, ?key, "timer fired");
                    self.core.fire(key, Instant::now());
                }
            }
            self.flush();
        }

        self.close();
        info!(%session_id, "session actor stopped");
    }

    fn handle(&mut self, cmd: SessionCommand<R>) {
        let now = Instant::now();
        match cmd {
            SessionCommand::Attach {
                player_id,
                conn_id,
                token,
                sender,
                reply,
            } => {
                let result = self.attach(player_id, conn_id, &token, sender, now);
                self.flush();
                let _ = reply.send(result);
            }
            SessionCommand::Detach { player_id, conn_id } => {
                let current = self.attached.get(&player_id).map(|a| a.conn_id);
                if current != Some(conn_id) {
                    debug!(
                        session_id = %self.core.id(),
                        %player_id,
                        conn_id,
                        "stale detach ignored"
                    );
                    return;
                }
                self.attached.remove(&player_id);
                self.core.disconnect(&player_id, now);
            }
            SessionCommand::Submit {
                player_id,
                mv,
                reply,
            } => {
                let result = self.core.submit(&player_id, mv, now);
                self.flush();
                let _ = reply.send(result);
            }
            SessionCommand::Chat { player_id, text } => self.core.chat(&player_id, text),
            SessionCommand::Leave { player_id, reply } => {
                let result = self.core.leave(&player_id, now).map_err(SessionError::from);
                // the farewell goes out first, then the seat stops hearing
                self.flush();
                self.attached.remove(&player_id);
                let _ = reply.send(result);
            }
            SessionCommand::ReconcileRequest { player_id } => {
                self.core.reconciliation_request(&player_id)
            }
            SessionCommand::PublishScores {
                observed_version,
                recomputed,
            } => {
                let check = self.core.publish_scores(observed_version, &recomputed);
                debug!(session_id = %self.core.id(), observed_version, ?check, "score check");
            }
            // handled by the run loop
            SessionCommand::Shutdown { .. } => {}
        }
    }

    fn attach(
        &mut self,
        player_id: PlayerId,
        conn_id: u64,
        token: &str,
        sender: SeatSender<R::State>,
        now: Instant,
    ) -> Result<Rejoin, SessionError> {
        let rejoin = self.core.reconnect(&player_id, token, now)?;
        // any older connection of the seat is superseded from here on
        self.attached
            .insert(player_id.clone(), Attached { conn_id, sender });
        info!(
            session_id = %self.core.id(),
            %player_id,
            conn_id,
            ?rejoin,
            "seat attached"
        );
        Ok(rejoin)
    }

    /// Delivers queued messages, publishes the record if it changed and
    /// carries out effects.
    fn flush(&mut self) {
        self.deliver();
        if self.core.take_dirty() {
            self.record.send_replace(Arc::new(self.core.record()));
        }

        for effect in self.core.take_effects() {
            match effect {
                Effect::Snapshot(trigger) => self.request_save(trigger),
                Effect::Teardown => self.stopping = true,
                Effect::Released(player_id) => {
                    let _ = self.events.send(SessionEvent::SeatReleased {
                        session_id: self.core.id(),
                        lobby_id: self.core.lobby_id(),
                        player_id,
                    });
                }
            }
        }
    }

    fn deliver(&mut self) {
        for (to, msg) in self.core.take_outbox() {
            self.dispatch(&to, msg);
        }
    }

    /// Sends `msg` to every attached seat `to` names. A seat without a live
    /// connection misses it; it is resynced when it comes back.
    fn dispatch(&self, to: &Recipient, msg: GameMessage<R::State>) {
        match to {
            Recipient::Player(player_id) => self.send_to(player_id, msg),
            _ => {
                for (player_id, seat) in &self.attached {
                    if to.includes(player_id) {
                        let _ = seat.sender.send(msg.clone());
                    }
                }
            }
        }
    }

    fn send_to(&self, player_id: &PlayerId, msg: GameMessage<R::State>) {
        if let Some(seat) = self.attached.get(player_id) {
            let _ = seat.sender.send(msg);
        }
    }

    fn request_save(&self, trigger: SnapshotTrigger) {
        if let Some(persist) = &self.persist {
            let _ = persist.send(PersistRequest::Save {
                trigger,
                reply: None,
            });
        }
    }

    /// Publishes the final record and waits for the shutdown snapshot.
    async fn shutdown(&mut self) {
        let session_id = self.core.id();
        info!(%session_id, version = self.core.version(), "session shutting down");
        self.record.send_replace(Arc::new(self.core.record()));

        let Some(persist) = &self.persist else {
            return;
        };
        let (reply, rx) = oneshot::channel();
        let request = PersistRequest::Save {
            trigger: SnapshotTrigger::Shutdown,
            reply: Some(reply),
        };
        if persist.send(request).is_err() {
            warn!(%session_id, "snapshot writer gone, shutdown snapshot skipped");
            return;
        }
        match rx.await {
            Ok(Ok(meta)) => debug!(%session_id, snapshot_id = meta.snapshot_id, "shutdown snapshot saved"),
            Ok(Err(e)) => warn!(%session_id, error = %e, "shutdown snapshot failed"),
            Err(_) => warn!(%session_id, "snapshot writer gone, shutdown snapshot skipped"),
        }
    }

    /// The session is over: drop its snapshots and report it.
    fn close(&mut self) {
        if let Some(persist) = &self.persist {
            let _ = persist.send(PersistRequest::Discard);
        }
        let _ = self.events.send(SessionEvent::Closed {
            session_id: self.core.id(),
            lobby_id: self.core.lobby_id(),
            seats: self.core.seats().to_vec(),
            result: self.core.result().cloned(),
        });
    }
}

/// Spawns the actor for `core` together with its score reconciler and, if
/// a store is given, its snapshot writer.
///
/// `attached` are the seats' connections at creation; restored sessions
/// start with none.
pub(crate) fn spawn_session<R: RuleEngine>(
    mut core: SessionCore<R>,
    attached: Vec<(PlayerId, u64, SeatSender<R::State>)>,
    rules: Arc<R>,
    config: &SessionConfig,
    store: Option<Arc<FileSnapshotStore>>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> SessionHandle<R> {
    let session_id = core.id();
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));
    let (record_tx, record_rx) = watch::channel(Arc::new(core.record()));
    core.take_dirty();

    let persist = store.map(|store| {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let cadence = Cadence::new("autosave", config.autosave_interval, config.autosave_interval / 10);
        let writer = Snapshotter::new(session_id, store, record_tx.subscribe(), persist_rx, cadence);
        tokio::spawn(writer.run());
        persist_tx
    });

    let handle = SessionHandle {
        session_id,
        commands: tx,
        record: record_rx,
        persist: persist.clone(),
    };

    let cadence = Cadence::new(
        "score-sync",
        config.scores.sync_interval,
        config.scores.sync_interval / 10,
    );
    let reconciler = ScoreReconciler::new(rules, handle.clone(), cadence);
    tokio::spawn(reconciler.run());

    let actor = SessionActor {
        core,
        attached: attached
            .into_iter()
            .map(|(player_id, conn_id, sender)| (player_id, Attached { conn_id, sender }))
            .collect(),
        receiver: rx,
        record: record_tx,
        persist,
        events,
        stopping: false,
    };
    tokio::spawn(actor.run());

    handle
}
