//! The authoritative state of one session and every way it can change.
//!
//! [`SessionCore`] is the Move Arbiter: the only writer of session state.
//! It is plain synchronous code with an explicit clock (`now`), so it can be
//! driven step by step in tests. The actor in [`crate::actor`] owns one,
//! feeds it commands and expired timers, and delivers what it queues.
//!
//! Moves enter through [`SessionCore::submit`]; timed-out turns are
//! synthesized internally. Either way the board changes in one commit step:
//! the rules work on a copy of the state, and the copy replaces the original
//! only once the rules have succeeded. The version then moves by exactly one
//! and exactly one `SYNC` for that version is queued.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_protocol::{
    AppliedMove, GameMessage, GameResult, LobbyId, Move, Phase, PlayerId,
    Recipient, ScoreEvent, SeatStatus, SeatView, SessionId, SessionView,
};
use tessera_recovery::{Attempt, RecoveryError, RecoveryManager, Rejoin};
use tessera_snapshot::SnapshotTrigger;
use tessera_timer::Deadlines;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Outcome, Rejection, RuleEngine, ScoreLedger, SessionConfig, TurnCoordinator};

/// Timers a session arms, one at most per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    TurnWarning,
    TurnDeadline,
    /// Next recovery attempt for a disconnected seat.
    Reconnect(PlayerId),
    /// Forced teardown of a finished session.
    Linger,
}

/// A message for the seats of a session.
pub type Outbound<S> = (Recipient, GameMessage<S>);

/// Work for the actor beyond delivering messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Save a snapshot now.
    Snapshot(SnapshotTrigger),
    /// Stop the session.
    Teardown,
    /// The seat is out of the game for good while play goes on; its player
    /// is free for other lobbies.
    Released(PlayerId),
}

/// Result of publishing the score vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreCheck {
    /// Scores matched; `SCORE_SYNC` queued.
    Published,
    /// Scores were repaired at this new version.
    Repaired(u64),
    /// The session moved on since the scores were computed.
    Stale,
}

/// What gets persisted and published after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord<S> {
    pub view: SessionView<S>,
    /// Reconnect token per seat.
    pub tokens: BTreeMap<PlayerId, String>,
    pub ledger: ScoreLedger,
}

/// One session's authoritative state.
pub struct SessionCore<R: RuleEngine> {
    id: SessionId,
    lobby_id: Option<LobbyId>,
    rules: Arc<R>,
    config: SessionConfig,
    order: Vec<PlayerId>,
    state: R::State,
    version: u64,
    phase: Phase,
    round: u32,
    turns: TurnCoordinator,
    links: RecoveryManager,
    scores: ScoreLedger,
    timers: Deadlines<TimerKey>,
    result: Option<GameResult>,
    outbox: Vec<Outbound<R::State>>,
    effects: Vec<Effect>,
    dirty: bool,
    torn_down: bool,
}

impl<R: RuleEngine> SessionCore<R> {
    /// Starts a session for `seats`. Seat order is sorted player-id order.
    ///
    /// Queues each seat's `JOIN` (with its reconnect token), the version-0
    /// `SYNC` and the first `TURN_START`.
    pub fn new(
        id: SessionId,
        lobby_id: Option<LobbyId>,
        rules: Arc<R>,
        config: SessionConfig,
        seats: Vec<PlayerId>,
        now: Instant,
    ) -> Self {
        let mut order = seats;
        order.sort();
        order.dedup();

        let state = rules.init(&order);
        let links = RecoveryManager::new(config.recovery.clone(), order.iter().cloned());
        let mut scores = ScoreLedger::new(&order, config.scores.history_limit);
        scores.repair(0, &rules.compute_score(&state));
        let turns = TurnCoordinator::new(config.turn.clone(), order.clone());

        let mut core = Self {
            id,
            lobby_id,
            rules,
            config,
            order,
            state,
            version: 0,
            phase: Phase::InProgress,
            round: 1,
            turns,
            links,
            scores,
            timers: Deadlines::new(),
            result: None,
            outbox: Vec::new(),
            effects: Vec::new(),
            dirty: true,
            torn_down: false,
        };

        for seat in core.order.clone() {
            core.send_join(&seat);
        }
        if let Some(first) = core.order.first().cloned() {
            core.open_turn(first, now);
        }
        core.broadcast_sync(None);
        core.announce_turn(now);

        info!(
            session_id = %core.id,
            seats = core.order.len(),
            first = ?core.turns.current_seat(),
            "session started"
        );
        core
    }

    /// Rebuilds a session from a snapshot. Every seat that was still playing
    /// comes back disconnected, with its old token and a fresh recovery
    /// window. Nothing is queued: nobody is connected yet.
    pub fn restore(
        rules: Arc<R>,
        config: SessionConfig,
        record: SessionRecord<R::State>,
        now: Instant,
    ) -> Self {
        let SessionRecord {
            view,
            tokens,
            ledger,
        } = record;
        let order = view.seat_order();

        let links = RecoveryManager::restore(
            config.recovery.clone(),
            view.seats.iter().map(|seat| match tokens.get(&seat.player_id) {
                Some(token) => (seat.player_id.clone(), token.clone(), seat.status),
                None => (seat.player_id.clone(), String::new(), SeatStatus::Failed),
            }),
        );
        let turns = TurnCoordinator::new(config.turn.clone(), order.clone())
            .with_skips(view.seats.iter().map(|s| (s.player_id.clone(), s.skips)));

        let mut core = Self {
            id: view.session_id,
            lobby_id: view.lobby_id,
            rules,
            config,
            order,
            state: view.board,
            version: view.version,
            phase: view.phase,
            round: view.round,
            turns,
            links,
            scores: ledger,
            timers: Deadlines::new(),
            result: None,
            outbox: Vec::new(),
            effects: Vec::new(),
            dirty: true,
            torn_down: false,
        };

        let first_wait = core.config.recovery.delay_for(1);
        let held: Vec<PlayerId> = core.links.held().cloned().collect();
        for seat in held {
            core.timers.schedule(TimerKey::Reconnect(seat), now + first_wait);
        }

        match core.phase {
            Phase::InProgress => {
                let resume_at = view
                    .current_turn
                    .or_else(|| core.order.first().cloned());
                if let Some(seat) = resume_at.and_then(|s| core.pick_from(&s)) {
                    core.open_turn(seat, now);
                }
            }
            Phase::RoundEnd => core.next_round(now),
            Phase::Waiting | Phase::GameEnd => {}
        }
        core.check_quorum(now);
        core.outbox.clear();

        info!(
            session_id = %core.id,
            version = core.version,
            held = core.links.held().count(),
            "session restored"
        );
        core
    }

    // -- queries ----------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn lobby_id(&self) -> Option<LobbyId> {
        self.lobby_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn seats(&self) -> &[PlayerId] {
        &self.order
    }

    pub fn state(&self) -> &R::State {
        &self.state
    }

    pub fn turns(&self) -> &TurnCoordinator {
        &self.turns
    }

    pub fn links(&self) -> &RecoveryManager {
        &self.links
    }

    pub fn scores(&self) -> &ScoreLedger {
        &self.scores
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn is_seated(&self, player_id: &PlayerId) -> bool {
        self.links.get(player_id).is_some()
    }

    /// When a timer is due, if armed.
    pub fn timer(&self, key: &TimerKey) -> Option<Instant> {
        self.timers.deadline(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn view(&self) -> SessionView<R::State> {
        SessionView {
            session_id: self.id,
            lobby_id: self.lobby_id,
            version: self.version,
            phase: self.phase,
            seats: self
                .order
                .iter()
                .map(|p| SeatView {
                    player_id: p.clone(),
                    status: self.links.status(p).unwrap_or(SeatStatus::Failed),
                    skips: self.turns.skips(p),
                })
                .collect(),
            current_turn: self.turns.current_seat().cloned(),
            round: self.round,
            scores: self.scores.vector().clone(),
            board: self.state.clone(),
        }
    }

    pub fn record(&self) -> SessionRecord<R::State> {
        SessionRecord {
            view: self.view(),
            tokens: self.links.tokens(),
            ledger: self.scores.clone(),
        }
    }

    // -- draining ---------------------------------------------------------

    pub fn take_outbox(&mut self) -> Vec<Outbound<R::State>> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Whether anything visible changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Waits for the next timer. Cancel-safe.
    pub async fn next_timer(&mut self) -> TimerKey {
        self.timers.next_expired().await
    }

    /// Fires every timer due at or before `now`, earliest first, each at
    /// its own deadline.
    pub fn advance_to(&mut self, now: Instant) {
        while let Some(at) = self.timers.next_deadline().filter(|at| *at <= now) {
            let Some(key) = self.timers.pop_expired(at) else {
                break;
            };
            self.fire(key, at);
        }
    }

    // -- the mutation path -----------------------------------------------

    /// Submits a move for `seat`.
    ///
    /// Accepted moves return the new version. Rejections change nothing and
    /// queue a `MOVE_REJECTED` for the submitter only.
    pub fn submit(
        &mut self,
        seat: &PlayerId,
        mv: Move,
        now: Instant,
    ) -> Result<u64, Rejection> {
        let result = self.try_submit(seat, mv, now);
        if let Err(rejection) = &result {
            debug!(
                session_id = %self.id,
                player_id = %seat,
                mv = mv.label(),
                %rejection,
                "move rejected"
            );
            self.send(
                Recipient::Player(seat.clone()),
                GameMessage::MoveRejected {
                    player_id: seat.clone(),
                    reason: rejection.to_string(),
                    version: self.version,
                },
            );
        }
        result
    }

    fn try_submit(
        &mut self,
        seat: &PlayerId,
        mv: Move,
        now: Instant,
    ) -> Result<u64, Rejection> {
        if !self.is_seated(seat) {
            return Err(Rejection::UnknownSeat(seat.clone()));
        }
        if self.phase != Phase::InProgress {
            return Err(Rejection::NotInProgress);
        }
        if !self.turns.is_turn_of(seat) {
            return Err(Rejection::NotYourTurn);
        }
        self.rules
            .is_legal(&self.state, seat, &mv)
            .map_err(Rejection::Illegal)?;

        let mut working = self.state.clone();
        let outcome = self
            .rules
            .apply_move(&mut working, seat, &mv)
            .map_err(Rejection::Illegal)?;
        Ok(self.commit(seat, mv, false, working, outcome, now))
    }

    /// Fires one timer.
    pub fn fire(&mut self, key: TimerKey, now: Instant) {
        match key {
            TimerKey::TurnWarning => self.on_warning(now),
            TimerKey::TurnDeadline => self.on_deadline(now),
            TimerKey::Reconnect(seat) => self.on_recovery_attempt(&seat, now),
            TimerKey::Linger => {
                info!(session_id = %self.id, "linger expired, tearing down");
                self.teardown();
            }
        }
    }

    /// The seat's connection dropped.
    pub fn disconnect(&mut self, seat: &PlayerId, now: Instant) {
        let delay = match self.links.disconnect(seat) {
            Ok(delay) => delay,
            Err(e) => {
                debug!(session_id = %self.id, player_id = %seat, error = %e, "disconnect ignored");
                return;
            }
        };
        self.dirty = true;

        if self.phase == Phase::GameEnd {
            self.check_teardown();
            return;
        }

        if self.turns.is_turn_of(seat) {
            self.turns.hold(now);
            self.arm_turn_timers(now);
        }
        self.timers
            .schedule(TimerKey::Reconnect(seat.clone()), now + delay);
        self.send(
            Recipient::AllExcept(seat.clone()),
            GameMessage::PlayerDisconnected {
                player_id: seat.clone(),
                attempts_left: self.config.recovery.max_attempts,
            },
        );
        self.effects.push(Effect::Snapshot(SnapshotTrigger::Disconnect));
    }

    /// A connection presents `token` to reclaim `seat`.
    ///
    /// On success the seat gets its `JOIN`, a private `SYNC` of the current
    /// version and, if the turn was its own, a fresh deadline.
    ///
    /// # Errors
    /// Whatever [`RecoveryManager::reconnect`] refuses.
    pub fn reconnect(
        &mut self,
        seat: &PlayerId,
        token: &str,
        now: Instant,
    ) -> Result<Rejoin, RecoveryError> {
        let rejoin = self.links.reconnect(seat, token)?;

        if rejoin == Rejoin::Recovered {
            self.dirty = true;
            self.timers.cancel(&TimerKey::Reconnect(seat.clone()));
            self.turns.reset_skips(seat);
            self.send(
                Recipient::AllExcept(seat.clone()),
                GameMessage::PlayerReconnected {
                    player_id: seat.clone(),
                },
            );
        }

        self.welcome(seat, now);

        if rejoin == Rejoin::Recovered
            && self.phase == Phase::InProgress
            && self.turns.is_turn_of(seat)
        {
            self.turns.resume(now);
            self.arm_turn_timers(now);
            self.send(
                Recipient::All,
                GameMessage::TurnResumed {
                    player_id: seat.clone(),
                    time_left_ms: millis(self.turns.time_left(now)),
                },
            );
            info!(session_id = %self.id, player_id = %seat, "turn resumed");
        }
        Ok(rejoin)
    }

    /// The seat leaves for good. After the game this is the acknowledgment
    /// that lets the session tear down.
    ///
    /// # Errors
    /// [`RecoveryError::Gone`] if the seat was already out.
    pub fn leave(&mut self, seat: &PlayerId, now: Instant) -> Result<(), RecoveryError> {
        if self.phase == Phase::GameEnd {
            if self.links.is_active(seat) {
                self.links.leave(seat)?;
                self.dirty = true;
            }
            self.check_teardown();
            return Ok(());
        }

        self.links.leave(seat)?;
        self.dirty = true;
        self.timers.cancel(&TimerKey::Reconnect(seat.clone()));
        self.effects.push(Effect::Released(seat.clone()));
        self.send(
            Recipient::AllExcept(seat.clone()),
            GameMessage::PlayerLeft {
                player_id: seat.clone(),
            },
        );
        if self.phase == Phase::InProgress && self.turns.is_turn_of(seat) {
            self.force_end(seat, now);
        }
        self.check_quorum(now);
        Ok(())
    }

    /// Relays chat from a seat that is still playing.
    pub fn chat(&mut self, seat: &PlayerId, text: String) {
        let text = text.trim();
        if text.is_empty() || !self.links.is_active(seat) {
            return;
        }
        self.send(
            Recipient::All,
            GameMessage::Chat {
                player_id: seat.clone(),
                text: text.to_string(),
            },
        );
    }

    /// Answers a seat's reconciliation request with its checkpoint and the
    /// events since.
    pub fn reconciliation_request(&mut self, seat: &PlayerId) {
        let Some((checkpoint, events)) = self.scores.history(seat) else {
            return;
        };
        debug!(session_id = %self.id, player_id = %seat, events = events.len(), "score history sent");
        self.send(
            Recipient::Player(seat.clone()),
            GameMessage::ScoreReconciliationResponse {
                player_id: seat.clone(),
                checkpoint,
                events,
            },
        );
    }

    /// Publishes the score vector if `recomputed`, worked out at
    /// `observed_version`, still matches it. A mismatch is repaired through
    /// the mutation path, which moves the version.
    pub fn publish_scores(
        &mut self,
        observed_version: u64,
        recomputed: &BTreeMap<PlayerId, i32>,
    ) -> ScoreCheck {
        if observed_version != self.version || self.phase == Phase::GameEnd {
            return ScoreCheck::Stale;
        }

        let check = if self.scores.matches(recomputed) {
            ScoreCheck::Published
        } else {
            self.version += 1;
            self.dirty = true;
            let events = self.scores.repair(self.version, recomputed);
            warn!(
                session_id = %self.id,
                version = self.version,
                adjustments = events.len(),
                "score drift repaired"
            );
            self.broadcast_sync(None);
            self.broadcast_scores(events);
            ScoreCheck::Repaired(self.version)
        };

        self.send(
            Recipient::All,
            GameMessage::ScoreSync {
                scores: self.scores.vector().clone(),
            },
        );
        check
    }

    // -- internals --------------------------------------------------------

    fn commit(
        &mut self,
        seat: &PlayerId,
        mv: Move,
        synthesized: bool,
        state: R::State,
        outcome: Outcome,
        now: Instant,
    ) -> u64 {
        self.state = state;
        self.version += 1;
        self.dirty = true;
        let version = self.version;
        let events = self.settle_scores(outcome.scores);
        let applied = Some(AppliedMove {
            player_id: seat.clone(),
            mv,
            synthesized,
        });

        debug!(
            session_id = %self.id,
            player_id = %seat,
            version,
            mv = mv.label(),
            synthesized,
            "move applied"
        );

        if outcome.game_over {
            self.close_turn();
            self.phase = Phase::GameEnd;
            self.broadcast_sync(applied);
            self.broadcast_scores(events);
            self.conclude(false, "game over", now);
        } else if outcome.round_over {
            self.close_turn();
            self.phase = Phase::RoundEnd;
            self.broadcast_sync(applied);
            self.broadcast_scores(events);
            self.scores.checkpoint();
            self.next_round(now);
        } else if outcome.turn_over {
            self.close_turn();
            self.advance_from(seat, now);
            self.broadcast_sync(applied);
            self.broadcast_scores(events);
            self.announce_turn(now);
        } else {
            self.broadcast_sync(applied);
            self.broadcast_scores(events);
        }
        version
    }

    /// Ends `seat`'s turn on its behalf.
    fn force_end(&mut self, seat: &PlayerId, now: Instant) {
        let mut working = self.state.clone();
        let mut outcome = self.rules.force_end_turn(&mut working, seat);
        outcome.turn_over = true;
        self.commit(seat, Move::EndTurn, true, working, outcome, now);
    }

    fn settle_scores(&mut self, deltas: Vec<crate::ScoreDelta>) -> Vec<ScoreEvent> {
        let recomputed = self.rules.compute_score(&self.state);
        self.scores.record(self.version, deltas, &recomputed)
    }

    /// Deals the next round as its own version.
    fn next_round(&mut self, now: Instant) {
        let opener = self.rules.start_round(&mut self.state);
        self.version += 1;
        self.round += 1;
        self.phase = Phase::InProgress;
        self.dirty = true;
        let events = self.settle_scores(Vec::new());

        let first = opener
            .or_else(|| self.order.first().cloned())
            .and_then(|seat| self.pick_from(&seat));
        if let Some(seat) = first {
            self.open_turn(seat, now);
        }

        info!(session_id = %self.id, round = self.round, version = self.version, "round started");
        self.broadcast_sync(None);
        self.broadcast_scores(events);
        self.announce_turn(now);
    }

    /// Hands the turn to the next eligible seat after `seat`: a connected
    /// one if any, otherwise one that is still held open.
    fn advance_from(&mut self, seat: &PlayerId, now: Instant) {
        let next = self
            .turns
            .next_after(seat, |p| self.links.is_connected(p))
            .or_else(|| self.turns.next_after(seat, |p| self.links.is_active(p)));
        if let Some(next) = next {
            self.open_turn(next, now);
        }
    }

    /// Like [`advance_from`](Self::advance_from) but `seat` goes first.
    fn pick_from(&self, seat: &PlayerId) -> Option<PlayerId> {
        self.turns
            .first_from(seat, |p| self.links.is_connected(p))
            .or_else(|| self.turns.first_from(seat, |p| self.links.is_active(p)))
    }

    fn open_turn(&mut self, seat: PlayerId, now: Instant) {
        let connected = self.links.is_connected(&seat);
        self.turns.begin(seat, now);
        if !connected {
            self.turns.hold(now);
        }
        self.arm_turn_timers(now);
    }

    fn close_turn(&mut self) {
        self.turns.end();
        self.timers.cancel(&TimerKey::TurnWarning);
        self.timers.cancel(&TimerKey::TurnDeadline);
    }

    fn arm_turn_timers(&mut self, now: Instant) {
        self.timers.cancel(&TimerKey::TurnWarning);
        self.timers.cancel(&TimerKey::TurnDeadline);
        if let Some(record) = self.turns.current() {
            self.timers.schedule(TimerKey::TurnDeadline, record.deadline);
        }
        if let Some(at) = self.turns.warning_at() {
            self.timers.schedule(TimerKey::TurnWarning, at.max(now));
        }
    }

    fn on_warning(&mut self, now: Instant) {
        if self.phase != Phase::InProgress || !self.turns.mark_warned() {
            return;
        }
        if let Some(seat) = self.turns.current_seat().cloned() {
            self.send(
                Recipient::All,
                GameMessage::TurnWarning {
                    player_id: seat,
                    time_left_ms: millis(self.turns.time_left(now)),
                },
            );
        }
    }

    /// Timeout path: one synthesized EndTurn, one skip, then advance.
    fn on_deadline(&mut self, now: Instant) {
        if self.phase != Phase::InProgress {
            return;
        }
        let Some(seat) = self.turns.current_seat().cloned() else {
            return;
        };

        let skips = self.turns.record_skip(&seat);
        let removed = self.turns.skips_exhausted(&seat);
        info!(session_id = %self.id, player_id = %seat, skips, "turn timed out");
        if removed {
            self.timers.cancel(&TimerKey::Reconnect(seat.clone()));
            match self.links.remove(&seat) {
                Ok(()) => self.effects.push(Effect::Released(seat.clone())),
                Err(e) => {
                    debug!(session_id = %self.id, player_id = %seat, error = %e, "seat already out");
                }
            }
        }

        self.force_end(&seat, now);

        if removed {
            info!(session_id = %self.id, player_id = %seat, skips, "seat removed");
            self.send(
                Recipient::All,
                GameMessage::PlayerRemoved {
                    player_id: seat,
                    skips,
                },
            );
            self.check_quorum(now);
        }
    }

    fn on_recovery_attempt(&mut self, seat: &PlayerId, now: Instant) {
        match self.links.attempt(seat) {
            Attempt::Retry {
                attempts_left,
                next_in,
                ..
            } => {
                self.timers
                    .schedule(TimerKey::Reconnect(seat.clone()), now + next_in);
                self.send(
                    Recipient::AllExcept(seat.clone()),
                    GameMessage::PlayerDisconnected {
                        player_id: seat.clone(),
                        attempts_left,
                    },
                );
            }
            Attempt::Exhausted => {
                self.dirty = true;
                self.effects.push(Effect::Released(seat.clone()));
                self.send(
                    Recipient::AllExcept(seat.clone()),
                    GameMessage::PlayerLeft {
                        player_id: seat.clone(),
                    },
                );
                if self.phase == Phase::InProgress && self.turns.is_turn_of(seat) {
                    self.force_end(seat, now);
                }
                self.check_quorum(now);
            }
            Attempt::Stale => {}
        }
    }

    /// Ends the session early once too few seats are still playing.
    fn check_quorum(&mut self, now: Instant) {
        if self.phase == Phase::GameEnd {
            return;
        }
        let active = self.links.active_count();
        if active < self.config.min_players {
            warn!(
                session_id = %self.id,
                active,
                min = self.config.min_players,
                "too few players left, ending early"
            );
            self.conclude(true, "not enough players", now);
        }
    }

    /// Enters GAME_END and announces the result.
    fn conclude(&mut self, truncated: bool, reason: &str, now: Instant) {
        if self.result.is_some() {
            return;
        }
        self.turns.end();
        self.timers.clear();

        if self.phase != Phase::GameEnd {
            self.version += 1;
            self.phase = Phase::GameEnd;
            self.dirty = true;
            self.broadcast_sync(None);
        }

        let vector = self.scores.vector().clone();
        let result = GameResult::rank(&vector, &self.order, truncated, reason);
        self.result = Some(result.clone());
        self.send(
            Recipient::All,
            GameMessage::GameEnd {
                scores: vector,
                truncated,
            },
        );
        self.send(
            Recipient::All,
            GameMessage::GameResult {
                result: result.clone(),
            },
        );
        info!(
            session_id = %self.id,
            version = self.version,
            truncated,
            winners = ?result.winners().collect::<Vec<_>>(),
            "game over"
        );
        self.timers
            .schedule(TimerKey::Linger, now + self.config.end_linger);
        self.check_teardown();
    }

    /// After the game, tear down once no seat is connected.
    fn check_teardown(&mut self) {
        let anyone_left = self.order.iter().any(|p| self.links.is_connected(p));
        if !anyone_left {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.timers.clear();
        self.effects.push(Effect::Teardown);
    }

    fn welcome(&mut self, seat: &PlayerId, now: Instant) {
        self.send_join(seat);
        self.send(
            Recipient::Player(seat.clone()),
            GameMessage::Sync {
                state: self.view(),
                last_move: None,
            },
        );
        let current = self.turns.current_seat().cloned();
        match (self.phase, current) {
            (Phase::InProgress, Some(holder)) if &holder != seat => {
                let msg = GameMessage::TurnStart {
                    player_id: holder,
                    time_left_ms: millis(self.turns.time_left(now)),
                };
                self.send(Recipient::Player(seat.clone()), msg);
            }
            (Phase::GameEnd, _) => {
                if let Some(result) = self.result.clone() {
                    self.send(
                        Recipient::Player(seat.clone()),
                        GameMessage::GameEnd {
                            scores: self.scores.vector().clone(),
                            truncated: result.truncated,
                        },
                    );
                    self.send(
                        Recipient::Player(seat.clone()),
                        GameMessage::GameResult { result },
                    );
                }
            }
            _ => {}
        }
    }

    fn send_join(&mut self, seat: &PlayerId) {
        let token = self.links.token(seat).map(str::to_string);
        self.send(
            Recipient::Player(seat.clone()),
            GameMessage::Join {
                player_id: seat.clone(),
                session_id: self.id,
                token,
            },
        );
    }

    fn announce_turn(&mut self, now: Instant) {
        if self.phase != Phase::InProgress {
            return;
        }
        if let Some(seat) = self.turns.current_seat().cloned() {
            self.send(
                Recipient::All,
                GameMessage::TurnStart {
                    player_id: seat,
                    time_left_ms: millis(self.turns.time_left(now)),
                },
            );
        }
    }

    fn broadcast_sync(&mut self, last_move: Option<AppliedMove>) {
        let state = self.view();
        self.send(Recipient::All, GameMessage::Sync { state, last_move });
    }

    fn broadcast_scores(&mut self, events: Vec<ScoreEvent>) {
        for event in events {
            self.send(
                Recipient::All,
                GameMessage::ScoreUpdate {
                    player_id: event.player_id.clone(),
                    event,
                },
            );
        }
    }

    fn send(&mut self, to: Recipient, msg: GameMessage<R::State>) {
        self.outbox.push((to, msg));
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
