//! Server network layer: one UDP socket driven by a single-threaded poll loop

use crate::game::{GameServer, Outcome, Reply};
use crate::persistence::PlayerStore;
use log::{debug, error, info, warn};
use shared::clock::{unix_time_ns, MonotonicClock, NANOS_PER_SEC};
use shared::protocol::{MessageType, PacketHeader, HEADER_SIZE, MAX_PACKET_SIZE};
use shared::world::PlotSource;
use shared::{Packet, Payload, WorldQuery};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

pub const DEFAULT_TICK_RATE: u32 = 20;

/// What one call to [`Server::tick`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evicted: usize,
    pub eviction_broadcast: bool,
    pub periodic_broadcast: bool,
}

/// Authoritative server owning the socket and the game state
pub struct Server<W, S> {
    socket: UdpSocket,
    game: GameServer<W, S>,
    clock: MonotonicClock,
    tick_interval_ns: i64,
    last_broadcast_ns: i64,
    out_sequence: u32,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

/// Binds a non-blocking UDP socket with address reuse enabled.
///
/// Must be called from inside a tokio runtime.
pub fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Sends one datagram without waiting. Returns false if it was not sent.
pub fn send_datagram(socket: &UdpSocket, bytes: &[u8], addr: SocketAddr) -> bool {
    match socket.try_send_to(bytes, addr) {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            debug!("Send buffer full, dropped datagram to {}", addr);
            false
        }
        Err(e) => {
            error!("Failed to send to {}: {}", addr, e);
            false
        }
    }
}

impl<W, S> Server<W, S>
where
    W: WorldQuery + PlotSource,
    S: PlayerStore,
{
    pub fn bind(addr: SocketAddr, game: GameServer<W, S>, tick_rate: u32) -> io::Result<Self> {
        let socket = bind_socket(addr)?;
        info!("Server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            game,
            clock: MonotonicClock::new(),
            tick_interval_ns: NANOS_PER_SEC / i64::from(tick_rate.max(1)),
            last_broadcast_ns: 0,
            out_sequence: 0,
            recv_buf: vec![0u8; MAX_PACKET_SIZE],
            send_buf: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn game(&self) -> &GameServer<W, S> {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut GameServer<W, S> {
        &mut self.game
    }

    pub fn into_game(self) -> GameServer<W, S> {
        self.game
    }

    fn next_sequence(&mut self) -> u32 {
        self.out_sequence = self.out_sequence.wrapping_add(1);
        self.out_sequence
    }

    /// Handles every datagram that is already waiting. Returns how many were read.
    pub fn poll_once(&mut self) -> usize {
        let mut received = 0;
        loop {
            let (len, addr) = match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Receive error: {}", e);
                    break;
                }
            };
            received += 1;

            let packet = match Packet::decode(&self.recv_buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping {} byte datagram from {}: {}", len, addr, e);
                    continue;
                }
            };

            let now_ns = self.clock.now_ns();
            if let Some(outcome) = self.game.handle_packet(packet, addr, now_ns) {
                self.dispatch(outcome);
            }
        }
        received
    }

    fn dispatch(&mut self, outcome: Outcome) {
        if outcome.onboarded {
            self.send_plots(outcome.session_id);
        }
        match outcome.reply {
            Reply::None => {}
            Reply::StateUpdate => self.send_state_update(outcome.session_id),
            Reply::Broadcast => {
                self.broadcast_all_players();
            }
        }
    }

    /// Periodic work: housekeeping and the roster broadcast at the tick rate.
    pub fn tick(&mut self) -> TickReport {
        let now_ns = self.clock.now_ns();
        self.tick_at(now_ns)
    }

    /// [`Server::tick`] at an explicit clock reading. An eviction broadcast
    /// stands in for that tick's periodic one.
    pub fn tick_at(&mut self, now_ns: i64) -> TickReport {
        let mut report = TickReport::default();
        if let Some(evicted) = self.game.poll_housekeeping(now_ns) {
            report.evicted = evicted;
            if evicted > 0 {
                debug!("Evicted {} sessions", evicted);
                self.last_broadcast_ns = now_ns;
                self.broadcast_all_players();
                report.eviction_broadcast = true;
            }
        }
        if now_ns.saturating_sub(self.last_broadcast_ns) >= self.tick_interval_ns {
            self.last_broadcast_ns = now_ns;
            self.broadcast_all_players();
            report.periodic_broadcast = true;
        }
        report
    }

    /// Sends the same roster to every session.
    ///
    /// The payload is encoded once; only the header is rewritten per
    /// recipient so each carries that session's ack.
    pub fn broadcast_all_players(&mut self) -> usize {
        if self.game.sessions().is_empty() {
            return 0;
        }
        let payload = Payload::AllPlayersState(self.game.roster());
        let body_len = match payload.encode(&mut self.send_buf[HEADER_SIZE..]) {
            Ok(body) => body.len(),
            Err(e) => {
                error!("Failed to encode roster: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for session in self.game.sessions().iter() {
            self.out_sequence = self.out_sequence.wrapping_add(1);
            let header = PacketHeader::new(
                MessageType::AllPlayersState,
                session.session_id,
                self.out_sequence,
                session.last_ack,
            );
            if header.encode(&mut self.send_buf[..HEADER_SIZE]).is_err() {
                continue;
            }
            if send_datagram(
                &self.socket,
                &self.send_buf[..HEADER_SIZE + body_len],
                session.addr,
            ) {
                sent += 1;
            }
        }
        sent
    }

    fn send_state_update(&mut self, session_id: u32) {
        let Some((addr, ack, update)) = self.game.state_update_for(session_id, unix_time_ns())
        else {
            return;
        };
        let sequence = self.next_sequence();
        let packet = Packet::new(session_id, sequence, ack, Payload::StateUpdate(update));
        self.send_packet(&packet, addr);
    }

    fn send_plots(&mut self, session_id: u32) {
        let Some(addr) = self.game.sessions().get(session_id).map(|s| s.addr) else {
            return;
        };
        let plots = self.game.plots_sync();
        debug!("Sending {} plots to session {}", plots.count, session_id);
        let sequence = self.next_sequence();
        let packet = Packet::new(session_id, sequence, 0, Payload::PlotsSync(Box::new(plots)));
        self.send_packet(&packet, addr);
    }

    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) {
        match packet.encode(&mut self.send_buf) {
            Ok(bytes) => {
                send_datagram(&self.socket, bytes, addr);
            }
            Err(e) => error!("Failed to encode {:?}: {}", packet.header.msg_type, e),
        }
    }

    /// Runs until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let tick = Duration::from_nanos(self.tick_interval_ns as u64);
        info!("Server started, tick interval {:?}", tick);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
                ready = self.socket.readable() => {
                    ready?;
                    self.poll_once();
                }
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
            self.tick();
        }
        Ok(())
    }
}
