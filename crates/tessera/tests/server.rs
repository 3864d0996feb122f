//! End-to-end tests: a real server on 127.0.0.1, raw WebSocket clients.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tessera::prelude::*;
use tessera_protocol::{
    AppliedMove, Codec, Envelope, JsonCodec, Line, PROTOCOL_VERSION, Payload, Phase,
    SystemMessage, TileColor, TileSource,
};
use tessera_rules::{AzulRules, AzulState};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Frame = Payload<AzulState>;

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Harness
// =========================================================================

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), TesseraError>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn test_config(snapshots: Option<&Path>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1:0".into();
    config.turn.timeout_ms = 5_000;
    config.turn.warning_ms = 1_000;
    config.turn.disconnect_grace_ms = 300;
    config.recovery.max_attempts = 3;
    config.recovery.backoff_base_ms = 1_000;
    match snapshots {
        Some(dir) => {
            config.snapshots.enabled = true;
            config.snapshots.save_dir = dir.join("game_saves");
            config.snapshots.temp_dir = dir.join("temp_saves");
        }
        None => config.snapshots.enabled = false,
    }
    config
}

async fn start(config: ServerConfig, rules: AzulRules) -> Running {
    let server = TesseraServerBuilder::new()
        .config(config)
        .build(rules, ClaimedIdentity)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel();
    let task = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Running { addr, stop, task }
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    seq: u64,
    /// Frames read but not yet matched, in arrival order.
    backlog: VecDeque<Frame>,
}

impl Client {
    async fn open(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        Self {
            ws,
            seq: 0,
            backlog: VecDeque::new(),
        }
    }

    /// Connects and completes the handshake as `player`.
    async fn connect(addr: SocketAddr, player: &str) -> Self {
        let mut client = Self::open(addr).await;
        client.handshake(player, PROTOCOL_VERSION).await;
        let ack = client.recv().await;
        assert!(
            matches!(ack, Payload::System(SystemMessage::HandshakeAck { ref player_id, .. }) if player_id.as_str() == player),
            "unexpected handshake reply: {ack:?}"
        );
        client
    }

    async fn handshake(&mut self, player: &str, version: u32) {
        self.send(Payload::System(SystemMessage::Handshake {
            version,
            player_id: PlayerId::from(player),
            name: player.to_uppercase(),
        }))
        .await;
    }

    async fn send(&mut self, payload: Frame) {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: 0,
            payload,
        };
        self.seq += 1;
        let bytes = JsonCodec.encode(&envelope).unwrap();
        self.ws.send(Message::Binary(bytes.into())).await.unwrap();
    }

    async fn lobby(&mut self, msg: LobbyMessage) {
        self.send(Payload::Lobby(msg)).await;
    }

    async fn game(&mut self, msg: GameMessage<AzulState>) {
        self.send(Payload::Game(msg)).await;
    }

    /// Next typed frame; liveness probes are answered and skipped.
    async fn recv(&mut self) -> Frame {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            match msg {
                Message::Binary(data) => {
                    let envelope: Envelope<AzulState> = JsonCodec.decode(&data).unwrap();
                    return envelope.payload;
                }
                Message::Text(text) if text.as_str() == "PING" => {
                    self.ws.send(Message::Text("PONG".into())).await.unwrap();
                }
                Message::Text(text) => {
                    let envelope: Envelope<AzulState> =
                        JsonCodec.decode(text.as_bytes()).unwrap();
                    return envelope.payload;
                }
                _ => {}
            }
        }
    }

    /// The first frame `pick` accepts. Lobby and game traffic are not
    /// ordered with each other, so frames it passes over are kept for later
    /// calls.
    async fn expect<T>(&mut self, mut pick: impl FnMut(Frame) -> Option<T>) -> T {
        if let Some((i, found)) = self
            .backlog
            .iter()
            .enumerate()
            .find_map(|(i, frame)| pick(frame.clone()).map(|found| (i, found)))
        {
            self.backlog.remove(i);
            return found;
        }
        loop {
            let frame = self.recv().await;
            if let Some(found) = pick(frame.clone()) {
                return found;
            }
            self.backlog.push_back(frame);
        }
    }

    async fn expect_lobby(&mut self, mut pick: impl FnMut(&Lobby) -> bool) -> Lobby {
        self.expect(|frame| match frame {
            Payload::Lobby(LobbyMessage::LobbyUpdate { lobby }) if pick(&lobby) => Some(lobby),
            _ => None,
        })
        .await
    }

    async fn expect_game<T>(
        &mut self,
        mut pick: impl FnMut(GameMessage<AzulState>) -> Option<T>,
    ) -> T {
        self.expect(|frame| match frame {
            Payload::Game(msg) => pick(msg),
            _ => None,
        })
        .await
    }

    async fn expect_sync(&mut self) -> (SessionView<AzulState>, Option<AppliedMove>) {
        self.expect_game(|msg| match msg {
            GameMessage::Sync { state, last_move } => Some((state, last_move)),
            _ => None,
        })
        .await
    }

    /// Our own `JOIN`: the session and the reconnect token.
    async fn expect_join(&mut self) -> (SessionId, String) {
        self.expect_game(|msg| match msg {
            GameMessage::Join {
                session_id,
                token: Some(token),
                ..
            } => Some((session_id, token)),
            _ => None,
        })
        .await
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// ana hosts, ben joins and readies up, ana starts. Returns both clients
/// right after the host asked to start.
async fn seat_two(addr: SocketAddr) -> (Client, Client, LobbyId) {
    let mut ana = Client::connect(addr, "ana").await;
    ana.lobby(LobbyMessage::LobbyCreate {
        name: "table".into(),
    })
    .await;
    let lobby = ana.expect_lobby(|_| true).await;

    let mut ben = Client::connect(addr, "ben").await;
    ben.lobby(LobbyMessage::PlayerJoined { lobby_id: lobby.id }).await;
    ben.lobby(LobbyMessage::PlayerReady {
        lobby_id: lobby.id,
        ready: true,
    })
    .await;
    ana.expect_lobby(|l| l.seats.len() == 2 && l.all_ready()).await;

    ana.lobby(LobbyMessage::GameStart {
        lobby_id: lobby.id,
        session_id: None,
        seats: Vec::new(),
    })
    .await;
    (ana, ben, lobby.id)
}

/// Like [`seat_two`] with cy as a third seat.
async fn seat_three(addr: SocketAddr) -> (Client, Client, Client, LobbyId) {
    let mut ana = Client::connect(addr, "ana").await;
    ana.lobby(LobbyMessage::LobbyCreate {
        name: "table".into(),
    })
    .await;
    let lobby = ana.expect_lobby(|_| true).await;

    let mut guests = Vec::new();
    for name in ["ben", "cy"] {
        let mut guest = Client::connect(addr, name).await;
        guest.lobby(LobbyMessage::PlayerJoined { lobby_id: lobby.id }).await;
        guest
            .lobby(LobbyMessage::PlayerReady {
                lobby_id: lobby.id,
                ready: true,
            })
            .await;
        guests.push(guest);
    }
    ana.expect_lobby(|l| l.seats.len() == 3 && l.all_ready()).await;

    ana.lobby(LobbyMessage::GameStart {
        lobby_id: lobby.id,
        session_id: None,
        seats: Vec::new(),
    })
    .await;
    let cy = guests.pop().unwrap();
    let ben = guests.pop().unwrap();
    (ana, ben, cy, lobby.id)
}

/// Asks for a new lobby and waits for the verdict: the lobby it hosts, or
/// the refusal text.
async fn create_lobby(client: &mut Client, host: &str) -> Result<Lobby, String> {
    client
        .lobby(LobbyMessage::LobbyCreate {
            name: format!("{host}'s table"),
        })
        .await;
    client
        .expect(|frame| match frame {
            Payload::Lobby(LobbyMessage::LobbyUpdate { lobby }) if lobby.host.as_str() == host => {
                Some(Ok(lobby))
            }
            Payload::Lobby(LobbyMessage::Error { message, .. }) => Some(Err(message)),
            _ => None,
        })
        .await
}

fn three_blue_seed() -> u64 {
    let seats = [PlayerId::from("ana"), PlayerId::from("ben")];
    (0..10_000)
        .find(|seed| {
            let state = AzulRules::seeded(*seed).init(&seats);
            state.factories[0]
                .iter()
                .filter(|c| **c == TileColor::Blue)
                .count()
                == 3
        })
        .expect("some seed deals three blue tiles to factory 0")
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_ack_then_lobby_list() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut ana = Client::connect(server.addr, "ana").await;

    let lobbies = ana
        .expect(|frame| match frame {
            Payload::Lobby(LobbyMessage::LobbyListUpdate { lobbies }) => Some(lobbies),
            _ => None,
        })
        .await;
    assert!(lobbies.is_empty());

    ana.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_version_mismatch_is_refused() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut client = Client::open(server.addr).await;
    client.handshake("ana", PROTOCOL_VERSION + 1).await;

    match client.recv().await {
        Payload::System(SystemMessage::Error { code, message }) => {
            assert_eq!(code, 400);
            assert!(message.contains("version"), "{message}");
        }
        other => panic!("expected an error, got {other:?}"),
    }
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut ana = Client::connect(server.addr, "ana").await;

    ana.ws
        .send(Message::Binary(b"{not json".to_vec().into()))
        .await
        .unwrap();
    let code = ana
        .expect(|frame| match frame {
            Payload::System(SystemMessage::Error { code, .. }) => Some(code),
            _ => None,
        })
        .await;
    assert_eq!(code, 400);

    ana.lobby(LobbyMessage::LobbyCreate {
        name: "still here".into(),
    })
    .await;
    let lobby = ana.expect_lobby(|_| true).await;
    assert_eq!(lobby.name, "still here");

    server.stop().await;
}

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut first = Client::connect(server.addr, "ana").await;
    let mut second = Client::connect(server.addr, "ana").await;

    let reason = first
        .expect(|frame| match frame {
            Payload::System(SystemMessage::Disconnect { reason }) => Some(reason),
            _ => None,
        })
        .await;
    assert!(reason.contains("superseded"), "{reason}");

    second
        .lobby(LobbyMessage::LobbyCreate {
            name: "mine".into(),
        })
        .await;
    let lobby = second.expect_lobby(|_| true).await;
    assert_eq!(lobby.host, PlayerId::from("ana"));

    server.stop().await;
}

// =========================================================================
// Lobby
// =========================================================================

#[tokio::test]
async fn test_join_unknown_lobby_is_refused_privately() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut ben = Client::connect(server.addr, "ben").await;

    ben.lobby(LobbyMessage::PlayerJoined {
        lobby_id: LobbyId(99),
    })
    .await;
    let (message, lobby) = ben
        .expect(|frame| match frame {
            Payload::Lobby(LobbyMessage::Error { message, lobby }) => Some((message, lobby)),
            _ => None,
        })
        .await;
    assert!(message.contains("L-99"), "{message}");
    assert!(lobby.is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_start_requires_every_seat_ready() {
    let server = start(test_config(None), AzulRules::new()).await;
    let mut ana = Client::connect(server.addr, "ana").await;
    ana.lobby(LobbyMessage::LobbyCreate {
        name: "table".into(),
    })
    .await;
    let lobby = ana.expect_lobby(|_| true).await;

    let mut ben = Client::connect(server.addr, "ben").await;
    ben.lobby(LobbyMessage::PlayerJoined { lobby_id: lobby.id }).await;
    ana.expect_lobby(|l| l.seats.len() == 2).await;

    ana.lobby(LobbyMessage::GameStart {
        lobby_id: lobby.id,
        session_id: None,
        seats: Vec::new(),
    })
    .await;
    let (_, current) = ana
        .expect(|frame| match frame {
            Payload::Lobby(LobbyMessage::Error { message, lobby }) => Some((message, lobby)),
            _ => None,
        })
        .await;
    let current = current.expect("the refusal carries the lobby");
    assert_eq!(current.status, tessera_protocol::LobbyStatus::Waiting);

    server.stop().await;
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_start_opens_session_with_first_seat_to_move() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (mut ana, mut ben, lobby_id) = seat_two(server.addr).await;

    for client in [&mut ana, &mut ben] {
        let (started, seats) = client
            .expect(|frame| match frame {
                Payload::Lobby(LobbyMessage::GameStart {
                    lobby_id,
                    session_id: Some(session_id),
                    seats,
                }) => Some(((lobby_id, session_id), seats)),
                _ => None,
            })
            .await;
        assert_eq!(started.0, lobby_id);
        assert_eq!(seats, vec![PlayerId::from("ana"), PlayerId::from("ben")]);

        let (view, last_move) = client.expect_sync().await;
        assert_eq!(view.session_id, started.1);
        assert_eq!(view.phase, Phase::InProgress);
        assert_eq!(view.version, 0);
        assert_eq!(view.current_turn, Some(PlayerId::from("ana")));
        assert!(last_move.is_none());
    }

    server.stop().await;
}

#[tokio::test]
async fn test_selecting_three_blue_tiles_bumps_version() {
    let server = start(test_config(None), AzulRules::seeded(three_blue_seed())).await;
    let (mut ana, mut ben, _) = seat_two(server.addr).await;
    let (before, _) = ana.expect_sync().await;
    assert_eq!(before.version, 0);

    ana.game(GameMessage::Move {
        player_id: PlayerId::from("ana"),
        mv: Move::SelectTiles {
            source: TileSource::Factory(0),
            color: TileColor::Blue,
        },
    })
    .await;

    let (after, last_move) = ana.expect_sync().await;
    assert_eq!(after.version, 1);
    assert_eq!(
        last_move.map(|m| (m.player_id, m.synthesized)),
        Some((PlayerId::from("ana"), false))
    );
    assert!(!after.board.factories[0].contains(&TileColor::Blue));
    let hand = &after.board.board(&PlayerId::from("ana")).unwrap().hand;
    assert_eq!(hand, &vec![TileColor::Blue; 3]);

    // ben sees the same version
    let (seen, _) = ben
        .expect_game(|msg| match msg {
            GameMessage::Sync { state, last_move } if state.version == 1 => {
                Some((state, last_move))
            }
            _ => None,
        })
        .await;
    assert_eq!(seen.board, after.board);

    server.stop().await;
}

#[tokio::test]
async fn test_out_of_turn_move_is_rejected_to_submitter_only() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (mut ana, mut ben, _) = seat_two(server.addr).await;
    ben.expect_sync().await;

    ben.game(GameMessage::Move {
        player_id: PlayerId::from("ben"),
        mv: Move::EndTurn,
    })
    .await;
    let version = ben
        .expect_game(|msg| match msg {
            GameMessage::MoveRejected { version, .. } => Some(version),
            _ => None,
        })
        .await;
    assert_eq!(version, 0);

    // placing before selecting is illegal even on your own turn
    ana.expect_sync().await;
    ana.game(GameMessage::Move {
        player_id: PlayerId::from("ana"),
        mv: Move::PlaceTiles {
            color: TileColor::Red,
            line: Line::Floor,
        },
    })
    .await;
    let version = ana
        .expect_game(|msg| match msg {
            GameMessage::MoveRejected { version, .. } => Some(version),
            _ => None,
        })
        .await;
    assert_eq!(version, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_disconnected_turn_passes_after_grace() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (ana, mut ben, _) = seat_two(server.addr).await;
    let (view, _) = ben.expect_sync().await;
    assert_eq!(view.current_turn, Some(PlayerId::from("ana")));

    ana.close().await;

    ben.expect_game(|msg| match msg {
        GameMessage::PlayerDisconnected { player_id, .. } if player_id.as_str() == "ana" => {
            Some(())
        }
        _ => None,
    })
    .await;

    let (view, last_move) = ben.expect_sync().await;
    assert_eq!(view.version, 1);
    let applied = last_move.expect("the synthesized move is attached");
    assert_eq!(applied.player_id, PlayerId::from("ana"));
    assert_eq!(applied.mv, Move::EndTurn);
    assert!(applied.synthesized);
    assert_eq!(view.current_turn, Some(PlayerId::from("ben")));
    assert_eq!(view.seat(&PlayerId::from("ana")).unwrap().skips, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_within_grace_resumes_turn() {
    let mut config = test_config(None);
    config.turn.disconnect_grace_ms = 2_000;
    let server = start(config, AzulRules::new()).await;
    let (mut ana, mut ben, _) = seat_two(server.addr).await;
    let (session_id, token) = ana.expect_join().await;
    ben.expect_sync().await;

    ana.close().await;
    ben.expect_game(|msg| match msg {
        GameMessage::PlayerDisconnected { player_id, .. } if player_id.as_str() == "ana" => {
            Some(())
        }
        _ => None,
    })
    .await;

    let mut ana = Client::connect(server.addr, "ana").await;
    ana.game(GameMessage::Join {
        player_id: PlayerId::from("ana"),
        session_id,
        token: Some(token),
    })
    .await;

    let (rejoined, _) = ana.expect_join().await;
    assert_eq!(rejoined, session_id);
    let (view, _) = ana.expect_sync().await;
    assert_eq!(view.version, 0);
    assert_eq!(view.current_turn, Some(PlayerId::from("ana")));
    let seat = view.seat(&PlayerId::from("ana")).unwrap();
    assert_eq!(seat.skips, 0);
    assert_eq!(seat.status, SeatStatus::Reconnected);

    let time_left = ana
        .expect_game(|msg| match msg {
            GameMessage::TurnResumed {
                player_id,
                time_left_ms,
            } if player_id.as_str() == "ana" => Some(time_left_ms),
            _ => None,
        })
        .await;
    // a fresh deadline, not what was left of the grace window
    assert!(time_left > 2_000, "{time_left}");

    ben.expect_game(|msg| match msg {
        GameMessage::PlayerReconnected { player_id } if player_id.as_str() == "ana" => Some(()),
        _ => None,
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn test_rejoin_with_wrong_token_is_refused() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (mut ana, _ben, _) = seat_two(server.addr).await;
    let (session_id, _) = ana.expect_join().await;

    ana.game(GameMessage::Join {
        player_id: PlayerId::from("ana"),
        session_id,
        token: Some("not-the-token".into()),
    })
    .await;
    let code = ana
        .expect(|frame| match frame {
            Payload::System(SystemMessage::Error { code, .. }) => Some(code),
            _ => None,
        })
        .await;
    assert_eq!(code, 401);

    server.stop().await;
}

#[tokio::test]
async fn test_player_who_left_may_open_a_new_lobby() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (_ana, mut ben, mut cy, old) = seat_three(server.addr).await;
    let (session_id, _) = cy.expect_join().await;

    cy.game(GameMessage::Leave {
        player_id: PlayerId::from("cy"),
    })
    .await;
    ben.expect_game(|msg| match msg {
        GameMessage::PlayerLeft { player_id } if player_id.as_str() == "cy" => Some(()),
        _ => None,
    })
    .await;

    let lobby = create_lobby(&mut cy, "cy").await.expect("cy is free to host");
    assert_ne!(lobby.id, old);
    assert_eq!(lobby.seats.len(), 1);

    // the others play on
    let (view, _) = ben.expect_sync().await;
    assert_eq!(view.session_id, session_id);
    assert_eq!(view.phase, Phase::InProgress);

    server.stop().await;
}

#[tokio::test]
async fn test_player_who_never_came_back_may_open_a_new_lobby() {
    let mut config = test_config(None);
    config.recovery.backoff_base_ms = 100;
    let server = start(config, AzulRules::new()).await;
    let (_ana, _ben, mut cy, _) = seat_three(server.addr).await;
    cy.expect_join().await;

    cy.close().await;
    // three attempts at 100, 200 and 300 ms, then the seat fails
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let mut cy = Client::connect(server.addr, "cy").await;
    let lobby = create_lobby(&mut cy, "cy").await.expect("cy is free to host");
    assert_eq!(lobby.host, PlayerId::from("cy"));

    server.stop().await;
}

#[tokio::test]
async fn test_chat_reaches_every_seat() {
    let server = start(test_config(None), AzulRules::new()).await;
    let (mut ana, mut ben, _) = seat_two(server.addr).await;
    ben.expect_join().await;

    ana.game(GameMessage::Chat {
        player_id: PlayerId::from("ana"),
        text: "good luck".into(),
    })
    .await;
    let (from, text) = ben
        .expect_game(|msg| match msg {
            GameMessage::Chat { player_id, text } => Some((player_id, text)),
            _ => None,
        })
        .await;
    assert_eq!(from, PlayerId::from("ana"));
    assert_eq!(text, "good luck");

    server.stop().await;
}

// =========================================================================
// Snapshots
// =========================================================================

#[tokio::test]
async fn test_shutdown_snapshot_restores_on_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(test_config(Some(dir.path())), AzulRules::new()).await;
    let (mut ana, _ben, _) = seat_two(server.addr).await;
    let (session_id, token) = ana.expect_join().await;
    let (before, _) = ana.expect_sync().await;
    server.stop().await;

    let saved = std::fs::read_dir(dir.path().join("game_saves"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(&format!("{}_", session_id.0))
        })
        .count();
    assert!(saved >= 1, "no snapshot written");

    let mut config = test_config(Some(dir.path()));
    config.snapshots.restore_on_start = true;
    let server = start(config, AzulRules::new()).await;

    let mut ana = Client::connect(server.addr, "ana").await;
    ana.game(GameMessage::Join {
        player_id: PlayerId::from("ana"),
        session_id,
        token: Some(token),
    })
    .await;
    let (rejoined, _) = ana.expect_join().await;
    assert_eq!(rejoined, session_id);
    let (after, _) = ana.expect_sync().await;
    assert_eq!(after.session_id, session_id);
    assert_eq!(after.version, before.version);
    assert_eq!(after.board, before.board);

    server.stop().await;
}
