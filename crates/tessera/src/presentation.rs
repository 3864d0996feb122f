//! Presentation sinks: how client events reach the UI.
//!
//! The UI implements up to three small traits, one per concern, and hands
//! them to a [`Presentation`]. The presentation owns the event receiver of
//! a [`GameClient`](crate::GameClient) and is drained from the UI thread,
//! so every callback runs there and never on the network task.

use std::collections::HashMap;
use std::time::Duration;

use tessera_protocol::{
    AppliedMove, GameMessage, GameResult, Lobby, LobbyId, LobbyMessage, PlayerId, ScoreVector,
    SeatStatus, SessionId, SessionView,
};
use tokio::sync::mpsc;

use crate::client::{ClientEvent, ConnectionStatus};

/// Connection-level callbacks.
pub trait ConnectionSink {
    fn on_connection_status(&mut self, status: &ConnectionStatus);

    /// A request was refused. `code` follows HTTP conventions.
    fn on_error(&mut self, code: u16, message: &str) {
        let _ = (code, message);
    }
}

/// Pre-game callbacks.
pub trait LobbySink {
    fn on_lobby_update(&mut self, lobby: &Lobby);

    fn on_game_start(&mut self, lobby_id: LobbyId, session_id: SessionId, seats: &[PlayerId]);

    fn on_lobby_list(&mut self, lobbies: &[Lobby]) {
        let _ = lobbies;
    }

    fn on_lobby_closed(&mut self, lobby_id: LobbyId, reason: &str) {
        let _ = (lobby_id, reason);
    }

    fn on_lobby_error(&mut self, message: &str, lobby: Option<&Lobby>) {
        let _ = (message, lobby);
    }
}

/// What a turn notice announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Started,
    Warning,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnNotice {
    pub player_id: PlayerId,
    pub phase: TurnPhase,
    pub time_left: Duration,
}

/// In-session callbacks. `S` is the board state.
pub trait GameSink<S> {
    /// A new authoritative state, once per version.
    fn on_game_state_update(&mut self, state: &SessionView<S>);

    /// The move that produced the state delivered right after it.
    fn on_game_move(&mut self, applied: &AppliedMove);

    fn on_chat_message(&mut self, player_id: &PlayerId, text: &str);

    /// Called once per actual change of a seat's status.
    fn on_player_status_change(&mut self, player_id: &PlayerId, status: SeatStatus);

    fn on_turn(&mut self, notice: &TurnNotice) {
        let _ = notice;
    }

    /// Only this client's own moves are ever rejected to it.
    fn on_move_rejected(&mut self, reason: &str, version: u64) {
        let _ = (reason, version);
    }

    fn on_scores(&mut self, scores: &ScoreVector) {
        let _ = scores;
    }

    fn on_game_result(&mut self, result: &GameResult) {
        let _ = result;
    }
}

/// Dispatches client events onto the sinks.
pub struct Presentation<S> {
    events: mpsc::UnboundedReceiver<ClientEvent<S>>,
    connection: Box<dyn ConnectionSink>,
    lobby: Box<dyn LobbySink>,
    game: Box<dyn GameSink<S>>,
    /// Last status reported per seat.
    seats: HashMap<PlayerId, SeatStatus>,
}

impl<S> Presentation<S> {
    pub fn new(
        events: mpsc::UnboundedReceiver<ClientEvent<S>>,
        connection: Box<dyn ConnectionSink>,
        lobby: Box<dyn LobbySink>,
        game: Box<dyn GameSink<S>>,
    ) -> Self {
        Self {
            events,
            connection,
            lobby,
            game,
            seats: HashMap::new(),
        }
    }

    /// Dispatches every event already queued without waiting. Returns how
    /// many were handled; call once per UI frame.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next event and dispatches it. `false` once the client
    /// is gone and the queue is drained.
    pub async fn next(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    pub fn dispatch(&mut self, event: ClientEvent<S>) {
        match event {
            ClientEvent::Status(status) => self.connection.on_connection_status(&status),
            ClientEvent::Error { code, message } => self.connection.on_error(code, &message),
            ClientEvent::Lobby(msg) => self.dispatch_lobby(msg),
            ClientEvent::Game(msg) => self.dispatch_game(msg),
        }
    }

    fn dispatch_lobby(&mut self, msg: LobbyMessage) {
        match msg {
            LobbyMessage::LobbyUpdate { lobby } => self.lobby.on_lobby_update(&lobby),
            LobbyMessage::LobbyListUpdate { lobbies } => self.lobby.on_lobby_list(&lobbies),
            LobbyMessage::GameStart {
                lobby_id,
                session_id: Some(session_id),
                seats,
            } => {
                self.seats.clear();
                self.lobby.on_game_start(lobby_id, session_id, &seats);
            }
            LobbyMessage::LobbyClosed { lobby_id, reason } => {
                self.lobby.on_lobby_closed(lobby_id, &reason)
            }
            LobbyMessage::Error { message, lobby } => {
                self.lobby.on_lobby_error(&message, lobby.as_ref())
            }
            // requests; the server never sends these
            _ => {}
        }
    }

    fn dispatch_game(&mut self, msg: GameMessage<S>) {
        match msg {
            GameMessage::Sync { state, last_move } => {
                if let Some(applied) = &last_move {
                    self.game.on_game_move(applied);
                }
                for seat in &state.seats {
                    self.seat_status(&seat.player_id, seat.status);
                }
                self.game.on_game_state_update(&state);
            }
            GameMessage::Chat { player_id, text } => {
                self.game.on_chat_message(&player_id, &text)
            }
            GameMessage::TurnStart {
                player_id,
                time_left_ms,
            } => self.turn(player_id, TurnPhase::Started, time_left_ms),
            GameMessage::TurnWarning {
                player_id,
                time_left_ms,
            } => self.turn(player_id, TurnPhase::Warning, time_left_ms),
            GameMessage::TurnResumed {
                player_id,
                time_left_ms,
            } => self.turn(player_id, TurnPhase::Resumed, time_left_ms),
            GameMessage::PlayerDisconnected { player_id, .. } => {
                self.seat_status(&player_id, SeatStatus::Disconnected)
            }
            GameMessage::PlayerReconnected { player_id } => {
                self.seat_status(&player_id, SeatStatus::Reconnected)
            }
            GameMessage::PlayerLeft { player_id } => {
                self.seat_status(&player_id, SeatStatus::Left)
            }
            GameMessage::PlayerRemoved { player_id, .. } => {
                self.seat_status(&player_id, SeatStatus::Removed)
            }
            GameMessage::MoveRejected {
                reason, version, ..
            } => self.game.on_move_rejected(&reason, version),
            GameMessage::ScoreSync { scores } | GameMessage::GameEnd { scores, .. } => {
                self.game.on_scores(&scores)
            }
            GameMessage::GameResult { result } => self.game.on_game_result(&result),
            _ => {}
        }
    }

    fn turn(&mut self, player_id: PlayerId, phase: TurnPhase, time_left_ms: u64) {
        self.game.on_turn(&TurnNotice {
            player_id,
            phase,
            time_left: Duration::from_millis(time_left_ms),
        });
    }

    fn seat_status(&mut self, player_id: &PlayerId, status: SeatStatus) {
        if self.seats.get(player_id) == Some(&status) {
            return;
        }
        self.seats.insert(player_id.clone(), status);
        self.game.on_player_status_change(player_id, status);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tessera_protocol::{LobbyStatus, Move, Phase, Seat, SeatView};

    use super::*;

    #[derive(Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, line: String) {
            self.0.lock().unwrap().push(line);
        }
    }

    impl ConnectionSink for Log {
        fn on_connection_status(&mut self, status: &ConnectionStatus) {
            self.push(format!("status {status:?}"));
        }
    }

    impl LobbySink for Log {
        fn on_lobby_update(&mut self, lobby: &Lobby) {
            self.push(format!("lobby {} {}", lobby.id, lobby.seats.len()));
        }

        fn on_game_start(&mut self, _: LobbyId, session_id: SessionId, seats: &[PlayerId]) {
            self.push(format!("start {session_id} {}", seats.len()));
        }
    }

    impl GameSink<()> for Log {
        fn on_game_state_update(&mut self, state: &SessionView<()>) {
            self.push(format!("state v{}", state.version));
        }

        fn on_game_move(&mut self, applied: &AppliedMove) {
            self.push(format!("move {} {}", applied.player_id, applied.mv.label()));
        }

        fn on_chat_message(&mut self, player_id: &PlayerId, text: &str) {
            self.push(format!("chat {player_id} {text}"));
        }

        fn on_player_status_change(&mut self, player_id: &PlayerId, status: SeatStatus) {
            self.push(format!("seat {player_id} {status:?}"));
        }

        fn on_turn(&mut self, notice: &TurnNotice) {
            self.push(format!("turn {} {:?}", notice.player_id, notice.phase));
        }
    }

    fn presentation() -> (
        mpsc::UnboundedSender<ClientEvent<()>>,
        Presentation<()>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let presentation = Presentation::new(
            rx,
            Box::new(Log(Arc::clone(&lines))),
            Box::new(Log(Arc::clone(&lines))),
            Box::new(Log(Arc::clone(&lines))),
        );
        (tx, presentation, lines)
    }

    fn view(version: u64, statuses: &[(&str, SeatStatus)]) -> SessionView<()> {
        SessionView {
            session_id: SessionId(1),
            lobby_id: Some(LobbyId(1)),
            version,
            phase: Phase::InProgress,
            seats: statuses
                .iter()
                .map(|(p, status)| SeatView {
                    player_id: PlayerId::from(*p),
                    status: *status,
                    skips: 0,
                })
                .collect(),
            current_turn: Some(PlayerId::from("ana")),
            round: 1,
            scores: ScoreVector::default(),
            board: (),
        }
    }

    #[test]
    fn test_events_reach_the_right_sinks() {
        let (tx, mut presentation, lines) = presentation();
        let lobby = Lobby {
            id: LobbyId(1),
            name: "table".into(),
            host: PlayerId::from("ana"),
            seats: vec![Seat {
                player_id: PlayerId::from("ana"),
                name: "Ana".into(),
                ready: true,
            }],
            min_players: 2,
            max_players: 4,
            status: LobbyStatus::Waiting,
            session_id: None,
        };

        tx.send(ClientEvent::Status(ConnectionStatus::Connected)).unwrap();
        tx.send(ClientEvent::Lobby(LobbyMessage::LobbyUpdate { lobby })).unwrap();
        tx.send(ClientEvent::Lobby(LobbyMessage::GameStart {
            lobby_id: LobbyId(1),
            session_id: Some(SessionId(1)),
            seats: vec![PlayerId::from("ana"), PlayerId::from("ben")],
        }))
        .unwrap();
        tx.send(ClientEvent::Game(GameMessage::Chat {
            player_id: PlayerId::from("ben"),
            text: "hi".into(),
        }))
        .unwrap();

        assert_eq!(presentation.pump(), 4);
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "status Connected",
                "lobby L-1 1",
                "start S-1 2",
                "chat ben hi",
            ]
        );
    }

    #[test]
    fn test_move_is_reported_before_its_state() {
        let (tx, mut presentation, lines) = presentation();
        tx.send(ClientEvent::Game(GameMessage::Sync {
            state: view(1, &[("ana", SeatStatus::Connected)]),
            last_move: Some(AppliedMove {
                player_id: PlayerId::from("ana"),
                mv: Move::EndTurn,
                synthesized: true,
            }),
        }))
        .unwrap();
        presentation.pump();

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "move ana end turn");
        assert_eq!(lines.last().map(String::as_str), Some("state v1"));
    }

    #[test]
    fn test_seat_status_changes_are_reported_once() {
        let (tx, mut presentation, lines) = presentation();
        let seats = [("ana", SeatStatus::Connected), ("ben", SeatStatus::Connected)];
        tx.send(ClientEvent::Game(GameMessage::Sync {
            state: view(0, &seats),
            last_move: None,
        }))
        .unwrap();
        tx.send(ClientEvent::Game(GameMessage::PlayerDisconnected {
            player_id: PlayerId::from("ben"),
            attempts_left: 3,
        }))
        .unwrap();
        tx.send(ClientEvent::Game(GameMessage::Sync {
            state: view(1, &[("ana", SeatStatus::Connected), ("ben", SeatStatus::Disconnected)]),
            last_move: None,
        }))
        .unwrap();
        presentation.pump();

        let changes: Vec<_> = lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("seat"))
            .cloned()
            .collect();
        assert_eq!(
            changes,
            vec![
                "seat ana Connected",
                "seat ben Connected",
                "seat ben Disconnected",
            ]
        );
    }

    #[tokio::test]
    async fn test_next_ends_when_client_is_gone() {
        let (tx, mut presentation, _lines) = presentation();
        tx.send(ClientEvent::Status(ConnectionStatus::Disconnected)).unwrap();
        drop(tx);
        assert!(presentation.next().await);
        assert!(!presentation.next().await);
    }
}
