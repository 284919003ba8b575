//! Client network thread
//!
//! Runs on its own OS thread with a current-thread tokio runtime. Each loop
//! iteration forwards queued local moves, keeps the session alive with a
//! periodic ping and handles every datagram already waiting on the socket;
//! when none of that produced work it sleeps briefly instead of spinning.

use crate::peers::PeerPublisher;
use crate::prediction::{PendingMove, PredictionEngine};
use log::{debug, error, info, warn};
use shared::clock::{unix_time_ms, MonotonicClock};
use shared::protocol::{sequence_greater_than, Leave, Ping, PlotRecord, MAX_PACKET_SIZE};
use shared::{Packet, Payload, Vector2, WorldQuery};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

pub const PING_INTERVAL: Duration = Duration::from_secs(2);
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub type SharedPlots = Arc<Mutex<Vec<PlotRecord>>>;

/// Copies the shared plots into the renderer's cache when they differ.
/// Skips the frame if the network thread holds the lock.
pub fn refresh_plot_cache(shared: &SharedPlots, cache: &mut Vec<PlotRecord>) -> bool {
    match shared.try_lock() {
        Ok(plots) if *plots != *cache => {
            cache.clone_from(&*plots);
            true
        }
        _ => false,
    }
}

/// Everything the network thread shares with the render thread
pub struct NetworkHandles {
    pub engine: Arc<PredictionEngine>,
    pub peers: PeerPublisher,
    pub plots: SharedPlots,
    pub moves: UnboundedReceiver<PendingMove>,
    pub shutdown: Arc<AtomicBool>,
}

pub struct NetworkClient<W> {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: u32,
    world: W,
    clock: MonotonicClock,
    handles: NetworkHandles,
    moves_open: bool,
    last_server_ack: u32,
    last_ping: Option<Instant>,
    send_sequence: u32,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

/// Spawns the network thread. The thread exits once `handles.shutdown` is set
/// or the move channel is closed, after sending `leave`.
pub fn spawn_network_thread<W>(
    server_addr: SocketAddr,
    session_id: u32,
    world: W,
    clock: MonotonicClock,
    handles: NetworkHandles,
) -> io::Result<JoinHandle<()>>
where
    W: WorldQuery + Send + 'static,
{
    thread::Builder::new()
        .name("network".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to start network runtime: {}", e);
                    return;
                }
            };
            runtime.block_on(async move {
                match NetworkClient::connect(server_addr, session_id, world, clock, handles).await
                {
                    Ok(mut client) => client.run().await,
                    Err(e) => error!("Failed to open client socket: {}", e),
                }
            });
        })
}

impl<W: WorldQuery> NetworkClient<W> {
    pub async fn connect(
        server_addr: SocketAddr,
        session_id: u32,
        world: W,
        clock: MonotonicClock,
        handles: NetworkHandles,
    ) -> io::Result<Self> {
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        info!(
            "Session {} talking to {} from {}",
            session_id,
            server_addr,
            socket.local_addr()?
        );

        Ok(Self {
            socket,
            server_addr,
            session_id,
            world,
            clock,
            handles,
            moves_open: true,
            last_server_ack: 0,
            last_ping: None,
            send_sequence: 0,
            recv_buf: vec![0u8; MAX_PACKET_SIZE],
            send_buf: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    fn running(&self) -> bool {
        self.moves_open && !self.handles.shutdown.load(Ordering::Acquire)
    }

    pub async fn run(&mut self) {
        while self.running() {
            let mut worked = self.forward_moves().await;
            worked |= self.ping_if_due().await;
            worked |= self.receive_pending() > 0;
            if !worked {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }

        info!("Leaving server");
        let leave = Payload::Leave(Leave {
            reason: Leave::REASON_QUIT,
        });
        let sequence = self.send_sequence;
        self.send(leave, sequence).await;
    }

    async fn forward_moves(&mut self) -> bool {
        let mut forwarded = false;
        loop {
            match self.handles.moves.try_recv() {
                Ok(pending) => {
                    self.send(Payload::Move(pending.cmd.into()), pending.seq).await;
                    forwarded = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.moves_open = false;
                    break;
                }
            }
        }
        forwarded
    }

    async fn ping_if_due(&mut self) -> bool {
        if self.last_ping.is_some_and(|t| t.elapsed() < PING_INTERVAL) {
            return false;
        }
        self.last_ping = Some(Instant::now());
        let ping = Payload::Ping(Ping {
            timestamp: unix_time_ms(),
        });
        let sequence = self.send_sequence;
        self.send(ping, sequence).await;
        true
    }

    /// Move packets carry the prediction sequence; everything else carries
    /// the last one sent so the server's stale filter is not affected.
    async fn send(&mut self, payload: Payload, sequence: u32) {
        if matches!(payload, Payload::Move(_)) {
            self.send_sequence = sequence;
        }
        let packet = Packet::new(self.session_id, sequence, self.last_server_ack, payload);
        let bytes = match packet.encode(&mut self.send_buf) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {:?}: {}", packet.header.msg_type, e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(bytes, self.server_addr).await {
            warn!("Failed to send to {}: {}", self.server_addr, e);
        }
    }

    /// Handles every datagram already queued. Returns how many were read.
    fn receive_pending(&mut self) -> usize {
        let mut received = 0;
        loop {
            let (len, from) = match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Receive error: {}", e);
                    break;
                }
            };
            received += 1;
            if from != self.server_addr {
                debug!("Ignoring datagram from {}", from);
                continue;
            }
            match Packet::decode(&self.recv_buf[..len]) {
                Ok(packet) => self.handle_packet(packet),
                Err(e) => warn!("Dropping malformed packet from server: {}", e),
            }
        }
        received
    }

    pub fn handle_packet(&mut self, packet: Packet) {
        if packet.header.session_id != self.session_id {
            debug!(
                "Ignoring packet addressed to session {}",
                packet.header.session_id
            );
            return;
        }
        let ack = packet.header.ack;
        match packet.payload {
            Payload::StateUpdate(update) => {
                self.apply_authoritative(ack, Vector2::new(update.x, update.y));
            }
            Payload::AllPlayersState(roster) => {
                let now_ns = self.clock.now_ns();
                let own = roster
                    .entries()
                    .iter()
                    .find(|e| e.session_id == self.session_id);
                if let Some(own) = own {
                    self.apply_authoritative(ack, Vector2::new(own.x, own.y));
                }
                self.handles.peers.apply_roster(&roster, now_ns);
            }
            Payload::PlotsSync(plots) => {
                info!("Received {} plots", plots.count);
                let mut shared = self
                    .handles
                    .plots
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                shared.clear();
                shared.extend_from_slice(plots.entries());
            }
            Payload::Ping(_) | Payload::Move(_) | Payload::Leave(_) => {
                warn!("Unexpected {:?} packet from server", packet.header.msg_type);
            }
        }
    }

    /// Reconciles against an authoritative position unless it is older than
    /// one already applied.
    fn apply_authoritative(&mut self, ack: u32, server_pos: Vector2) {
        if sequence_greater_than(self.last_server_ack, ack) {
            debug!(
                "Ignoring out-of-order server state (ack {} < {})",
                ack, self.last_server_ack
            );
            return;
        }
        self.last_server_ack = ack;
        let corrected = self
            .handles
            .engine
            .reconcile_state(ack, server_pos, &self.world);
        self.handles
            .engine
            .push_snapshot(self.clock.now_ns(), corrected);
    }

    pub fn last_server_ack(&self) -> u32 {
        self.last_server_ack
    }
}
