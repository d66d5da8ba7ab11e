//! End-to-end tests driving a full in-process server over real TCP.
//!
//! The auth service is stubbed (ticket `"ticket-<id>"` authenticates as
//! player `<id>`) and chat uses an in-process loopback broker, so the
//! tests exercise everything from the frame codec to the tick loop without
//! external services.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use meridian_protocol::input_flags::D;
use meridian_protocol::{decode_packet, encode_packet, frame, Packet, PacketId, Vec2};
use world_server::auth_service::{AuthService, VerifyTicketResponse};
use world_server::chat_service::ChatBroker;
use world_server::config::GameConfig;
use world_server::prelude::Result;
use world_server::{start_server, ServerHandle, ServerOptions};

/// `"ticket-<id>"` authenticates as player `<id>`; anything else fails.
struct StubAuthService;

impl AuthService for StubAuthService {
    fn verify_session_ticket(&self, session_ticket: &str) -> BoxFuture<'static, VerifyTicketResponse> {
        let ticket = session_ticket.to_string();
        Box::pin(async move {
            match ticket.strip_prefix("ticket-").and_then(|id| id.parse::<u64>().ok()) {
                Some(player_id) => VerifyTicketResponse {
                    success: true,
                    player_id,
                    username: format!("user{player_id}"),
                    pos_x: 0.0,
                    pos_y: 0.0,
                    hp: 100,
                    max_hp: 100,
                    error_code: 0,
                    error_message: String::new(),
                },
                None => VerifyTicketResponse::failure(1, "unknown ticket"),
            }
        })
    }
}

/// In-process pub/sub: publishes loop straight back to the subscriber.
struct LoopbackBroker {
    tx: flume::Sender<String>,
    rx: flume::Receiver<String>,
}

impl LoopbackBroker {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

impl ChatBroker for LoopbackBroker {
    fn publish(&self, _channel: &str, payload: String) -> BoxFuture<'static, Result<()>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send_async(payload).await.map_err(|_| anyhow::anyhow!("subscriber gone"))
        })
    }

    fn subscribe(&self, _channel: &str) -> BoxFuture<'static, Result<BoxStream<'static, String>>> {
        let rx = self.rx.clone();
        Box::pin(async move { Ok(rx.into_stream().boxed()) })
    }
}

async fn with_timeout<T>(what: &str, fut: impl Future<Output = T>) -> T {
    let timeout = async {
        smol::Timer::after(Duration::from_secs(5)).await;
        None
    };
    let wrapped = async { Some(fut.await) };
    match smol::future::race(wrapped, timeout).await {
        Some(value) => value,
        None => panic!("timed out waiting for {what}"),
    }
}

async fn boot(options: ServerOptions) -> ServerHandle {
    start_server(options).await.expect("server should start")
}

fn default_options() -> ServerOptions {
    ServerOptions {
        bind_addr: "127.0.0.1:0".to_string(),
        auth: Some(Arc::new(StubAuthService)),
        ..Default::default()
    }
}

/// Small map so two spawns are always within AOI range of each other.
fn small_map_options() -> ServerOptions {
    let mut game = GameConfig::default();
    game.map.width = 60.0;
    game.map.height = 60.0;
    ServerOptions {
        game,
        ..default_options()
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = with_timeout("connect", TcpStream::connect(addr)).await.expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        Self { stream }
    }

    async fn send(&mut self, packet: &Packet) {
        let body = encode_packet(packet).expect("encode packet");
        let buf = frame::encode(&body).expect("encode frame");
        self.stream.write_all(&buf).await.expect("write frame");
    }

    async fn recv(&mut self) -> Packet {
        let mut header = [0u8; frame::HEADER_SIZE];
        self.stream.read_exact(&mut header).await.expect("read header");
        let len = frame::parse_header(header).expect("valid length");
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.expect("read body");
        decode_packet(&body).expect("decode packet")
    }

    /// Receive, discarding frames until one matches `id`.
    async fn recv_until(&mut self, id: PacketId) -> Packet {
        loop {
            let packet = self.recv().await;
            if packet.id() == id {
                return packet;
            }
        }
    }

    async fn login(&mut self, player_id: u64, command_id: i64) -> Packet {
        self.send(&Packet::C_Login {
            session_ticket: format!("ticket-{player_id}"),
            command_id,
        })
        .await;
        with_timeout("login reply", self.recv_until(PacketId::S_LoginSuccess)).await
    }

    async fn enter_zone(&mut self, zone_id: i32) -> Packet {
        self.send(&Packet::C_EnterZone { zone_id }).await;
        with_timeout("zone entered", self.recv_until(PacketId::S_ZoneEntered)).await
    }

    async fn send_input(&mut self, flags: u8, sequence_number: u32) {
        self.send(&Packet::C_PlayerInput {
            tick_number: 0,
            client_time: 0,
            input_flags: flags,
            mouse_position: Vec2::default(),
            sequence_number,
            command_id: 0,
        })
        .await;
    }

    /// Next snapshot's state entry for one player, skipping everything else.
    async fn next_state_of(&mut self, player_id: u64) -> meridian_protocol::PlayerState {
        loop {
            if let Packet::S_WorldSnapshot { states, .. } =
                with_timeout("snapshot", self.recv_until(PacketId::S_WorldSnapshot)).await
            {
                if let Some(state) = states.iter().find(|s| s.player_id == player_id) {
                    return *state;
                }
            }
        }
    }
}

#[test]
fn login_enter_move_and_leave() {
    smol::block_on(async {
        let handle = boot(default_options()).await;
        let addr = handle.local_addr();

        let mut client = TestClient::connect(addr).await;
        let reply = client.login(42, 7).await;
        match reply {
            Packet::S_LoginSuccess { player_info, command_id } => {
                assert_eq!(command_id, 7);
                assert_eq!(player_info.player_id, 42);
                assert_eq!(player_info.name, "user42");
            }
            other => panic!("expected login success, got {:?}", other.id()),
        }

        let entered = client.enter_zone(1).await;
        let spawn = match entered {
            Packet::S_ZoneEntered { zone_id, player, near_players } => {
                assert_eq!(zone_id, 1);
                assert_eq!(player.player_id, 42);
                assert!(near_players.is_empty());
                player.position
            }
            other => panic!("expected zone entered, got {:?}", other.id()),
        };
        assert!(spawn.x >= 20.0 && spawn.x <= 180.0);
        assert!(spawn.y >= 20.0 && spawn.y <= 180.0);

        // Hold D: velocity shows up in snapshots and x advances.
        client.send_input(D, 1).await;
        let first = client.next_state_of(42).await;
        smol::Timer::after(Duration::from_millis(300)).await;
        client.send_input(D, 2).await;
        let later = client.next_state_of(42).await;
        assert!(later.position.x > first.position.x, "player should move right");
        assert_eq!(later.velocity, Vec2::new(5.0, 0.0));

        // Second player joins: the first one hears about it.
        let mut other = TestClient::connect(addr).await;
        other.login(43, 8).await;
        other.enter_zone(1).await;
        let joined = with_timeout("join broadcast", client.recv_until(PacketId::S_PlayerJoined)).await;
        match joined {
            Packet::S_PlayerJoined { player_info } => assert_eq!(player_info.player_id, 43),
            other => panic!("expected join, got {:?}", other.id()),
        }

        // Second player disconnects: the first one hears that too.
        drop(other);
        let left = with_timeout("leave broadcast", client.recv_until(PacketId::S_PlayerLeft)).await;
        match left {
            Packet::S_PlayerLeft { player_id } => assert_eq!(player_id, 43),
            other => panic!("expected leave, got {:?}", other.id()),
        }

        handle.shutdown();
    });
}

#[test]
fn bad_ticket_gets_a_failure_packet_and_stays_connected() {
    smol::block_on(async {
        let handle = boot(default_options()).await;
        let mut client = TestClient::connect(handle.local_addr()).await;

        client
            .send(&Packet::C_Login {
                session_ticket: "garbage".to_string(),
                command_id: 3,
            })
            .await;
        let reply = with_timeout("login failure", client.recv_until(PacketId::S_LoginFailure)).await;
        match reply {
            Packet::S_LoginFailure { error_code, command_id, .. } => {
                assert_eq!(error_code, 1);
                assert_eq!(command_id, 3);
            }
            other => panic!("expected failure, got {:?}", other.id()),
        }

        // The session survives a failed login.
        let reply = client.login(9, 4).await;
        assert_eq!(reply.id(), PacketId::S_LoginSuccess);
        handle.shutdown();
    });
}

#[test]
fn stale_sequence_numbers_are_ignored() {
    smol::block_on(async {
        let handle = boot(default_options()).await;
        let mut client = TestClient::connect(handle.local_addr()).await;
        client.login(50, 1).await;
        client.enter_zone(1).await;

        client.send_input(D, 10).await;
        smol::Timer::after(Duration::from_millis(100)).await;
        // Sequence went backwards: must not change the velocity.
        client.send_input(meridian_protocol::input_flags::W, 9).await;
        smol::Timer::after(Duration::from_millis(100)).await;

        let state = client.next_state_of(50).await;
        assert_eq!(state.velocity, Vec2::new(5.0, 0.0));
        handle.shutdown();
    });
}

#[test]
fn aoi_visibility_between_nearby_players() {
    smol::block_on(async {
        let handle = boot(small_map_options()).await;
        let addr = handle.local_addr();

        let mut a = TestClient::connect(addr).await;
        a.login(1, 1).await;
        a.enter_zone(1).await;

        let mut b = TestClient::connect(addr).await;
        b.login(2, 2).await;
        let entered = b.enter_zone(1).await;
        match entered {
            Packet::S_ZoneEntered { near_players, .. } => {
                assert_eq!(near_players.len(), 1);
                assert_eq!(near_players[0].player_id, 1);
            }
            other => panic!("expected zone entered, got {:?}", other.id()),
        }

        // On a 60x60 map every spawn is within the 100-unit AOI range, so
        // each player must see both in snapshots.
        let state = a.next_state_of(2).await;
        assert!(state.active);
        let state = b.next_state_of(1).await;
        assert!(state.active);
        handle.shutdown();
    });
}

#[test]
fn connection_cap_refuses_surplus_clients() {
    smol::block_on(async {
        let handle = boot(ServerOptions {
            max_connections: 2,
            ..default_options()
        })
        .await;
        let addr = handle.local_addr();

        let mut first = TestClient::connect(addr).await;
        let _second = TestClient::connect(addr).await;
        // Give the registry a moment to count both.
        smol::Timer::after(Duration::from_millis(100)).await;

        let mut surplus = TestClient::connect(addr).await;
        let mut buf = [0u8; 1];
        let outcome = with_timeout("cap refusal", surplus.stream.read(&mut buf)).await;
        assert!(matches!(outcome, Ok(0) | Err(_)), "surplus connection should be closed");

        // Existing sessions are unaffected.
        let reply = first.login(60, 1).await;
        assert_eq!(reply.id(), PacketId::S_LoginSuccess);
        handle.shutdown();
    });
}

#[test]
fn invalid_frame_length_terminates_the_session() {
    smol::block_on(async {
        let handle = boot(default_options()).await;

        for header in [0u32.to_le_bytes(), 100_001u32.to_le_bytes()] {
            let mut client = TestClient::connect(handle.local_addr()).await;
            client.stream.write_all(&header).await.expect("write header");
            let mut buf = [0u8; 1];
            let outcome = with_timeout("disconnect", client.stream.read(&mut buf)).await;
            assert!(matches!(outcome, Ok(0) | Err(_)), "session should be terminated");
        }
        handle.shutdown();
    });
}

#[test]
fn undecodable_payload_terminates_the_session() {
    smol::block_on(async {
        let handle = boot(default_options()).await;
        let mut client = TestClient::connect(handle.local_addr()).await;

        let buf = frame::encode(&[0xFF; 32]).expect("frame");
        client.stream.write_all(&buf).await.expect("write");
        let mut byte = [0u8; 1];
        let outcome = with_timeout("disconnect", client.stream.read(&mut byte)).await;
        assert!(matches!(outcome, Ok(0) | Err(_)));
        handle.shutdown();
    });
}

#[test]
fn chat_fans_out_to_every_session() {
    smol::block_on(async {
        let handle = boot(ServerOptions {
            chat: Some(Arc::new(LoopbackBroker::new())),
            ..default_options()
        })
        .await;
        let addr = handle.local_addr();

        let mut sender = TestClient::connect(addr).await;
        sender.login(7, 1).await;
        let mut receiver = TestClient::connect(addr).await;
        receiver.login(8, 2).await;

        sender
            .send(&Packet::C_Chat {
                message: "hi".to_string(),
            })
            .await;

        for client in [&mut sender, &mut receiver] {
            let chat = with_timeout("chat broadcast", client.recv_until(PacketId::S_Chat)).await;
            match chat {
                Packet::S_Chat { player_id, message } => {
                    assert_eq!(player_id, 7);
                    assert_eq!(message, "hi");
                }
                other => panic!("expected chat, got {:?}", other.id()),
            }
        }
        handle.shutdown();
    });
}

#[test]
fn reconnect_restores_the_player_at_its_last_position() {
    smol::block_on(async {
        let handle = boot(default_options()).await;
        let addr = handle.local_addr();

        let mut client = TestClient::connect(addr).await;
        client.login(70, 1).await;
        let position = match client.enter_zone(1).await {
            Packet::S_ZoneEntered { player, .. } => player.position,
            other => panic!("expected zone entered, got {:?}", other.id()),
        };
        drop(client);
        // Let the disconnect command run through a tick.
        smol::Timer::after(Duration::from_millis(150)).await;

        let mut reconnected = TestClient::connect(addr).await;
        reconnected.login(70, 2).await;
        match reconnected.enter_zone(1).await {
            Packet::S_ZoneEntered { player, .. } => {
                assert_eq!(player.player_id, 70);
                assert_eq!(player.position, position, "player should resume at its last position");
            }
            other => panic!("expected zone entered, got {:?}", other.id()),
        }
        handle.shutdown();
    });
}
