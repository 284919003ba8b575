//! Authoritative game logic: session lifecycle, movement and housekeeping.
//!
//! Nothing here touches a socket. Handling a packet mutates the session table
//! and returns an [`Outcome`] telling the network layer what to send.

use crate::persistence::PlayerStore;
use crate::session::{Session, SessionTable, MAX_SESSIONS};
use log::{debug, info, warn};
use shared::clock::NANOS_PER_SEC;
use shared::movement::{clamp_to_world, integrate};
use shared::protocol::{AllPlayersState, PlotsSync, StateUpdate};
use shared::world::PlotSource;
use shared::{MovementCommand, Packet, Payload, WorldQuery, SPAWN_POSITION};
use std::net::SocketAddr;

pub const HOUSEKEEPING_INTERVAL_NS: i64 = 5 * NANOS_PER_SEC;
pub const SESSION_TIMEOUT_NS: i64 = 30 * NANOS_PER_SEC;

/// What the network layer should send after a packet was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    None,
    /// `state_update` to the sender, acknowledging its latest move
    StateUpdate,
    /// Full roster to every session
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub session_id: u32,
    /// First packet from this session: send the one-time `plots_sync`
    pub onboarded: bool,
    pub reply: Reply,
}

pub struct GameServer<W, S> {
    sessions: SessionTable,
    world: W,
    store: S,
    last_housekeeping_ns: i64,
}

impl<W, S> GameServer<W, S>
where
    W: WorldQuery + PlotSource,
    S: PlayerStore,
{
    pub fn new(world: W, store: S) -> Self {
        Self {
            sessions: SessionTable::new(MAX_SESSIONS),
            world,
            store,
            last_housekeeping_ns: 0,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Applies one decoded packet. Returns `None` if it was dropped.
    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now_ns: i64) -> Option<Outcome> {
        let session_id = packet.header.session_id;
        let onboarded = if self.sessions.contains(session_id) {
            false
        } else {
            if matches!(packet.payload, Payload::Leave(_)) {
                debug!("Ignoring leave from unknown session {}", session_id);
                return None;
            }
            self.create_session(session_id, addr, now_ns)?;
            true
        };

        let session = self.sessions.get_mut(session_id)?;
        session.touch(addr, now_ns);

        let reply = match packet.payload {
            Payload::Ping(_) => Reply::Broadcast,
            Payload::Move(m) => {
                if self.apply_move(session_id, packet.header.sequence, m.into()) {
                    Reply::StateUpdate
                } else {
                    Reply::None
                }
            }
            Payload::Leave(leave) => {
                info!("Session {} left (reason {})", session_id, leave.reason);
                self.remove_session(session_id);
                Reply::Broadcast
            }
            Payload::StateUpdate(_) | Payload::AllPlayersState(_) | Payload::PlotsSync(_) => {
                warn!(
                    "Unexpected {:?} packet from session {} at {}",
                    packet.header.msg_type, session_id, addr
                );
                Reply::None
            }
        };

        Some(Outcome {
            session_id,
            onboarded,
            reply,
        })
    }

    fn create_session(&mut self, session_id: u32, addr: SocketAddr, now_ns: i64) -> Option<()> {
        if self.sessions.len() >= MAX_SESSIONS {
            warn!(
                "Server full, dropping packet from new session {} at {}",
                session_id, addr
            );
            return None;
        }
        let state = self
            .store
            .load_player_state(session_id)
            .map(|s| clamp_to_world(s, &self.world))
            .unwrap_or(SPAWN_POSITION);
        self.sessions
            .insert(Session::new(session_id, addr, state, now_ns))
            .then_some(())
    }

    /// Integrates a move against the world. Returns false for a stale sequence.
    ///
    /// A blocked move still counts as applied: the sender gets acked with its
    /// unchanged position so its prediction snaps back.
    fn apply_move(&mut self, session_id: u32, sequence: u32, cmd: MovementCommand) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !session.accept_sequence(sequence) {
            debug!(
                "Dropping stale move {} from session {} (ack {})",
                sequence, session_id, session.last_ack
            );
            return false;
        }

        let next = integrate(session.state, &cmd, &self.world);
        if next != session.state {
            session.state = next;
            session.dirty = true;
        }
        true
    }

    fn remove_session(&mut self, session_id: u32) {
        if let Some(session) = self.sessions.remove(session_id) {
            self.store.queue_persist(session.session_id, session.state);
        }
    }

    /// Runs a housekeeping pass if the interval has elapsed.
    ///
    /// Returns `Some(evicted)` when a pass ran. Dirty sessions are queued for
    /// persistence on every pass.
    pub fn poll_housekeeping(&mut self, now_ns: i64) -> Option<usize> {
        if now_ns.saturating_sub(self.last_housekeeping_ns) < HOUSEKEEPING_INTERVAL_NS {
            return None;
        }
        self.last_housekeeping_ns = now_ns;
        Some(self.housekeep(now_ns))
    }

    pub fn housekeep(&mut self, now_ns: i64) -> usize {
        let mut scratch = [0u32; MAX_SESSIONS];
        let count = self
            .sessions
            .collect_stale(now_ns, SESSION_TIMEOUT_NS, &mut scratch);
        for &session_id in &scratch[..count] {
            info!("Session {} timed out", session_id);
            self.remove_session(session_id);
        }

        for session in self.sessions.iter_mut() {
            if session.dirty {
                self.store.queue_persist(session.session_id, session.state);
                session.dirty = false;
            }
        }
        count
    }

    /// Queues every live session, used on shutdown.
    pub fn persist_all(&mut self) {
        for session in self.sessions.iter_mut() {
            self.store.queue_persist(session.session_id, session.state);
            session.dirty = false;
        }
    }

    pub fn roster(&self) -> AllPlayersState {
        self.sessions.roster()
    }

    /// `state_update` for one session along with where to send it and its ack.
    pub fn state_update_for(
        &self,
        session_id: u32,
        timestamp_ns: i64,
    ) -> Option<(SocketAddr, u32, StateUpdate)> {
        self.sessions.get(session_id).map(|s| {
            (
                s.addr,
                s.last_ack,
                StateUpdate {
                    x: s.state.x,
                    y: s.state.y,
                    timestamp_ns,
                },
            )
        })
    }

    pub fn plots_sync(&self) -> PlotsSync {
        PlotsSync::from_records(self.world.plots())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::protocol::{Direction, Leave, Move, Ping};
    use shared::world::TileWorld;
    use shared::{PlayerState, Vector2};
    use std::collections::HashMap;

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub saved: HashMap<u32, PlayerState>,
        pub queued: Vec<(u32, PlayerState)>,
    }

    impl PlayerStore for MemoryStore {
        fn load_player_state(&self, session_id: u32) -> Option<PlayerState> {
            self.saved.get(&session_id).copied()
        }

        fn queue_persist(&mut self, session_id: u32, state: PlayerState) {
            self.queued.push((session_id, state));
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn game() -> GameServer<TileWorld, MemoryStore> {
        GameServer::new(TileWorld::builtin(), MemoryStore::default())
    }

    fn ping(session_id: u32) -> Packet {
        Packet::new(session_id, 0, 0, Payload::Ping(Ping { timestamp: 0 }))
    }

    fn mv(session_id: u32, sequence: u32, direction: Direction, speed: f32, delta: f32) -> Packet {
        Packet::new(
            session_id,
            sequence,
            0,
            Payload::Move(Move {
                direction,
                speed,
                delta,
            }),
        )
    }

    #[test]
    fn test_first_packet_creates_session() {
        let mut game = game();
        let outcome = game.handle_packet(ping(42), addr(), 10).unwrap();
        assert!(outcome.onboarded);
        assert_eq!(outcome.reply, Reply::Broadcast);
        assert_eq!(game.sessions().get(42).unwrap().state, SPAWN_POSITION);

        let outcome = game.handle_packet(ping(42), addr(), 20).unwrap();
        assert!(!outcome.onboarded);
        assert_eq!(game.sessions().get(42).unwrap().last_heard_ns, 20);
    }

    #[test]
    fn test_new_session_seeded_from_store() {
        let mut store = MemoryStore::default();
        store.saved.insert(42, Vector2::new(64.0, 80.0));
        let mut game = GameServer::new(TileWorld::builtin(), store);
        game.handle_packet(ping(42), addr(), 0);
        assert_eq!(game.sessions().get(42).unwrap().state, Vector2::new(64.0, 80.0));
    }

    #[test]
    fn test_move_right_scenario() {
        let mut game = game();
        let outcome = game
            .handle_packet(mv(1, 1, Direction::Right, 3.0, 0.5), addr(), 0)
            .unwrap();
        assert_eq!(outcome.reply, Reply::StateUpdate);

        let (to, ack, update) = game.state_update_for(1, 99).unwrap();
        assert_eq!(to, addr());
        assert_eq!(ack, 1);
        assert_eq!((update.x, update.y), (1.5, 0.0));

        let roster = game.roster();
        assert_eq!(roster.entries()[0].x, 1.5);
        assert_eq!(roster.entries()[0].y, 0.0);
    }

    #[test]
    fn test_stale_move_is_ignored() {
        let mut game = game();
        game.handle_packet(mv(1, 2, Direction::Right, 10.0, 1.0), addr(), 0);
        let outcome = game
            .handle_packet(mv(1, 1, Direction::Right, 10.0, 1.0), addr(), 1)
            .unwrap();
        assert_eq!(outcome.reply, Reply::None);
        let session = game.sessions().get(1).unwrap();
        assert_eq!(session.state.x, 10.0);
        assert_eq!(session.last_ack, 2);
        assert_eq!(session.last_heard_ns, 1);
    }

    #[test]
    fn test_blocked_move_is_still_acked() {
        let mut world = TileWorld::open(4, 4);
        world.set_tile(1, 0, shared::world::Tile::Rock);
        let mut game = GameServer::new(world, MemoryStore::default());

        let outcome = game
            .handle_packet(mv(1, 1, Direction::Right, 8.0, 1.0), addr(), 0)
            .unwrap();
        assert_eq!(outcome.reply, Reply::StateUpdate);
        let session = game.sessions().get(1).unwrap();
        assert_eq!(session.state, SPAWN_POSITION);
        assert_eq!(session.last_ack, 1);
        assert!(!session.dirty);
    }

    #[test]
    fn test_leave_removes_and_persists() {
        let mut game = game();
        game.handle_packet(mv(1, 1, Direction::Down, 4.0, 1.0), addr(), 0);
        let outcome = game
            .handle_packet(
                Packet::new(1, 2, 0, Payload::Leave(Leave { reason: 0 })),
                addr(),
                1,
            )
            .unwrap();
        assert_eq!(outcome.reply, Reply::Broadcast);
        assert!(game.sessions().is_empty());
        assert_eq!(game.store().queued, vec![(1, Vector2::new(0.0, 4.0))]);
    }

    #[test]
    fn test_leave_from_unknown_session_is_dropped() {
        let mut game = game();
        let packet = Packet::new(9, 1, 0, Payload::Leave(Leave { reason: 0 }));
        assert!(game.handle_packet(packet, addr(), 0).is_none());
        assert!(game.sessions().is_empty());
    }

    #[test]
    fn test_server_full_drops_new_sessions() {
        let mut game = game();
        for id in 0..MAX_SESSIONS as u32 {
            assert!(game.handle_packet(ping(id), addr(), 0).is_some());
        }
        assert!(game.handle_packet(ping(1000), addr(), 0).is_none());
        assert_eq!(game.sessions().len(), MAX_SESSIONS);
    }

    #[test]
    fn test_unexpected_payload_only_refreshes_liveness() {
        let mut game = game();
        game.handle_packet(ping(3), addr(), 0);
        let packet = Packet::new(
            3,
            0,
            0,
            Payload::StateUpdate(StateUpdate {
                x: 500.0,
                y: 500.0,
                timestamp_ns: 0,
            }),
        );
        let outcome = game.handle_packet(packet, addr(), 7).unwrap();
        assert_eq!(outcome.reply, Reply::None);
        let session = game.sessions().get(3).unwrap();
        assert_eq!(session.state, SPAWN_POSITION);
        assert_eq!(session.last_heard_ns, 7);
    }

    #[test]
    fn test_housekeeping_evicts_after_timeout() {
        let mut game = game();
        game.handle_packet(ping(1), addr(), 0);

        let mut passes_with_evictions = 0;
        for second in 1..=40 {
            if let Some(evicted) = game.poll_housekeeping(second * NANOS_PER_SEC) {
                if evicted > 0 {
                    passes_with_evictions += 1;
                    assert!(second > 30);
                    assert_eq!(second, 35);
                }
            }
        }
        assert_eq!(passes_with_evictions, 1);
        assert!(game.sessions().is_empty());
    }

    #[test]
    fn test_housekeeping_runs_on_interval() {
        let mut game = game();
        assert!(game.poll_housekeeping(NANOS_PER_SEC).is_none());
        assert_eq!(game.poll_housekeeping(5 * NANOS_PER_SEC), Some(0));
        assert!(game.poll_housekeeping(9 * NANOS_PER_SEC).is_none());
        assert_eq!(game.poll_housekeeping(10 * NANOS_PER_SEC), Some(0));
    }

    #[test]
    fn test_housekeeping_queues_dirty_sessions_once() {
        let mut game = game();
        game.handle_packet(mv(1, 1, Direction::Right, 2.0, 1.0), addr(), 0);
        game.housekeep(NANOS_PER_SEC);
        game.housekeep(2 * NANOS_PER_SEC);
        assert_eq!(game.store().queued, vec![(1, Vector2::new(2.0, 0.0))]);
    }

    #[test]
    fn test_plots_sync_from_world() {
        let game = game();
        let plots = game.plots_sync();
        assert_eq!(plots.count as usize, TileWorld::builtin().plots().len());
    }
}
