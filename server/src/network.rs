//! Server network layer handling UDP communications and game loop coordination
//!
//! The transport is a thin pub/sub shell around the orchestrator: inbound
//! datagrams become intents delivered to `MatchState`, and the `Event`s it
//! returns become unicast or broadcast packets. Everything that mutates
//! game state happens on the single `run` task; the receiver and sender
//! tasks only move bytes, so a slow or dead consumer can never stall a
//! simulation tick.

use crate::game::{Event, MatchState};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Packet, DECISION_WINDOW_MS, EFFECT_DELAY_MS, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Silence threshold before a connection is presumed dead. Spectators only
/// listen, so clients are expected to ping with `RequestStatus` well within
/// this window.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the timeout sweep runs.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Which negotiation delay a fired timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Effect,
    Decision,
}

/// Messages sent from auxiliary tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    TimerFired {
        player_id: u32,
        token: u64,
        kind: TimerKind,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the game loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        addrs: Vec<SocketAddr>,
    },
}

/// Address bookkeeping for connected clients. Owned by the main loop, so
/// no locking: the sender task receives resolved addresses in each message.
struct Connections {
    by_addr: HashMap<SocketAddr, u32>,
    by_id: HashMap<u32, SocketAddr>,
    last_seen: HashMap<u32, Instant>,
}

impl Connections {
    fn new() -> Self {
        Self {
            by_addr: HashMap::new(),
            by_id: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    fn add(&mut self, addr: SocketAddr, player_id: u32) {
        self.by_addr.insert(addr, player_id);
        self.by_id.insert(player_id, addr);
        self.last_seen.insert(player_id, Instant::now());
    }

    fn remove(&mut self, player_id: u32) -> Option<SocketAddr> {
        self.last_seen.remove(&player_id);
        let addr = self.by_id.remove(&player_id)?;
        self.by_addr.remove(&addr);
        Some(addr)
    }

    fn player_at(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    fn addr_of(&self, player_id: u32) -> Option<SocketAddr> {
        self.by_id.get(&player_id).copied()
    }

    fn touch(&mut self, player_id: u32) {
        self.last_seen.insert(player_id, Instant::now());
    }

    fn timed_out(&self, timeout: Duration) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn addrs(&self) -> Vec<SocketAddr> {
        self.by_addr.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.by_addr.len()
    }
}

/// Main server coordinating networking and the match simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    state: MatchState,
    conns: Connections,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_players: usize,
        seed: Option<u64>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            state: MatchState::new(max_players, rng),
            conns: Connections::new(),
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 8192];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, addrs } => {
                        for addr in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn queue_send(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn queue_broadcast(&self, packet: Packet) {
        if self.conns.len() == 0 {
            return;
        }
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet,
            addrs: self.conns.addrs(),
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Arms a one-shot negotiation timer. The token travels with it; by the
    /// time it fires the orchestrator may have moved on, in which case the
    /// fired message is recognized as stale and dropped.
    fn arm_timer(&self, player_id: u32, token: u64, kind: TimerKind, delay: Duration) {
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = server_tx.send(ServerMessage::TimerFired {
                player_id,
                token,
                kind,
            });
        });
    }

    /// Carries out the side effects the orchestrator asked for.
    fn dispatch(&self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Broadcast(packet) => self.queue_broadcast(packet),
                Event::ToPlayer(player_id, packet) => {
                    if let Some(addr) = self.conns.addr_of(player_id) {
                        self.queue_send(packet, addr);
                    } else {
                        debug!("Dropping packet for unconnected player {}", player_id);
                    }
                }
                Event::ArmEffectTimer { player_id, token } => self.arm_timer(
                    player_id,
                    token,
                    TimerKind::Effect,
                    Duration::from_millis(EFFECT_DELAY_MS),
                ),
                Event::ArmDecisionTimer { player_id, token } => self.arm_timer(
                    player_id,
                    token,
                    TimerKind::Decision,
                    Duration::from_millis(DECISION_WINDOW_MS),
                ),
            }
        }
    }

    /// Resolves the player behind an address and refreshes their liveness.
    fn resolve(&mut self, addr: SocketAddr) -> Option<u32> {
        match self.conns.player_at(addr) {
            Some(id) => {
                self.conns.touch(id);
                Some(id)
            }
            None => {
                debug!("Ignoring packet from unknown address {}", addr);
                None
            }
        }
    }

    /// Processes one inbound packet and applies it to the match state
    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                name,
                client_version,
            } => {
                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Client at {} has protocol version {} (want {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    self.queue_send(
                        Packet::Rejected {
                            reason: "protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A second Join from a known address is a spectator asking
                // to compete, not a new connection.
                if let Some(id) = self.conns.player_at(addr) {
                    self.conns.touch(id);
                    let events = self.state.rejoin_as_challenger(id);
                    self.dispatch(events);
                    return;
                }

                info!("Client connecting from {} as {:?}", addr, name);
                let (id, events) = self.state.join(name);
                match id {
                    Some(id) => {
                        self.conns.add(addr, id);
                        self.dispatch(events);
                    }
                    None => {
                        self.queue_send(
                            Packet::Rejected {
                                reason: "server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Move { dir } => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.move_piece(id, dir);
                    self.dispatch(events);
                }
            }

            Packet::Rotate => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.rotate_piece(id);
                    self.dispatch(events);
                }
            }

            Packet::HardDrop => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.hard_drop(id);
                    self.dispatch(events);
                }
            }

            Packet::Hold => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.hold(id);
                    self.dispatch(events);
                }
            }

            Packet::RequestStatus => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.request_status(id);
                    self.dispatch(events);
                }
            }

            Packet::ContinueResponse { accept } => {
                if let Some(id) = self.resolve(addr) {
                    let events = self.state.continue_response(id, accept);
                    self.dispatch(events);
                }
            }

            Packet::Disconnect => {
                if let Some(id) = self.conns.player_at(addr) {
                    self.conns.remove(id);
                    let events = self.state.disconnect(id);
                    self.dispatch(events);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    fn handle_timer(&mut self, player_id: u32, token: u64, kind: TimerKind) {
        let events = match kind {
            TimerKind::Effect => self.state.effect_elapsed(player_id, token),
            TimerKind::Decision => self.state.decision_elapsed(player_id, token),
        };
        self.dispatch(events);
    }

    /// Drops connections that have gone silent and removes their players.
    fn sweep_timeouts(&mut self) {
        for id in self.conns.timed_out(CLIENT_TIMEOUT) {
            warn!("Player {} timed out", id);
            self.conns.remove(id);
            let events = self.state.disconnect(id);
            self.dispatch(events);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_sweep = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network and timer events between ticks
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        },
                        Some(ServerMessage::TimerFired { player_id, token, kind }) => {
                            self.handle_timer(player_id, token, kind);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Advance the simulation one fixed step
                _ = tick_interval.tick() => {
                    let events = self.state.tick();
                    self.dispatch(events);

                    if last_sweep.elapsed() >= TIMEOUT_SWEEP_INTERVAL {
                        last_sweep = Instant::now();
                        self.sweep_timeouts();
                    }

                    // Periodic health logging
                    if self.state.tick_count() % 500 == 0 && self.conns.len() > 0 {
                        debug!(
                            "Tick {}: {} connection(s), phase {:?}",
                            self.state.tick_count(),
                            self.conns.len(),
                            self.state.phase()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
