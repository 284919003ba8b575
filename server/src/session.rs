//! Session table for the authoritative server
//!
//! Sessions are keyed by the client-chosen session id carried in every header.
//! A session is created by the first datagram with an unseen id, refreshed by
//! every datagram after that, and destroyed by `leave` or housekeeping.
//! Only the server thread owns and mutates the table.

use log::info;
use shared::protocol::{sequence_greater_than, AllPlayersState, PlayerEntry, MAX_ROSTER_PLAYERS};
use shared::PlayerState;
use std::collections::HashMap;
use std::net::SocketAddr;

pub const MAX_SESSIONS: usize = MAX_ROSTER_PLAYERS;

/// Server-side state for one connected player
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u32,
    /// Last address a datagram arrived from; replies always go here
    pub addr: SocketAddr,
    pub state: PlayerState,
    pub last_heard_ns: i64,
    /// Highest move sequence applied, echoed back as the header ack
    pub last_ack: u32,
    /// State changed since it was last queued for persistence
    pub dirty: bool,
}

impl Session {
    pub fn new(session_id: u32, addr: SocketAddr, state: PlayerState, now_ns: i64) -> Self {
        Self {
            session_id,
            addr,
            state,
            last_heard_ns: now_ns,
            last_ack: 0,
            dirty: false,
        }
    }

    /// Refreshes liveness and re-targets replies to the latest source address.
    pub fn touch(&mut self, addr: SocketAddr, now_ns: i64) {
        if self.addr != addr {
            info!(
                "Session {} moved from {} to {}",
                self.session_id, self.addr, addr
            );
            self.addr = addr;
        }
        self.last_heard_ns = now_ns;
    }

    /// Accepts `sequence` if it is newer than the last applied move.
    pub fn accept_sequence(&mut self, sequence: u32) -> bool {
        if sequence_greater_than(sequence, self.last_ack) {
            self.last_ack = sequence;
            true
        } else {
            false
        }
    }

    pub fn is_stale(&self, now_ns: i64, timeout_ns: i64) -> bool {
        now_ns.saturating_sub(self.last_heard_ns) > timeout_ns
    }
}

pub struct SessionTable {
    sessions: HashMap<u32, Session>,
    max_sessions: usize,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::with_capacity(max_sessions),
            max_sessions,
        }
    }

    /// Inserts a new session. Returns false if the table is full.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.len() >= self.max_sessions {
            return false;
        }
        info!(
            "Session {} joined from {} at ({:.1}, {:.1})",
            session.session_id, session.addr, session.state.x, session.state.y
        );
        self.sessions.insert(session.session_id, session);
        true
    }

    pub fn remove(&mut self, session_id: u32) -> Option<Session> {
        self.sessions.remove(&session_id)
    }

    pub fn get(&self, session_id: u32) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn contains(&self, session_id: u32) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Writes the ids of stale sessions into `scratch` and returns how many.
    ///
    /// `scratch` is sized to the table capacity, so a scan never allocates.
    pub fn collect_stale(
        &self,
        now_ns: i64,
        timeout_ns: i64,
        scratch: &mut [u32; MAX_SESSIONS],
    ) -> usize {
        let mut count = 0;
        for session in self.sessions.values() {
            if count == scratch.len() {
                break;
            }
            if session.is_stale(now_ns, timeout_ns) {
                scratch[count] = session.session_id;
                count += 1;
            }
        }
        count
    }

    /// One snapshot of every session, bounded to the roster size.
    pub fn roster(&self) -> AllPlayersState {
        let mut roster = AllPlayersState::default();
        for session in self.sessions.values() {
            if !roster.push(PlayerEntry {
                session_id: session.session_id,
                x: session.state.x,
                y: session.state.y,
            }) {
                break;
            }
        }
        roster
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::clock::NANOS_PER_SEC;
    use shared::Vector2;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn session(id: u32, now_ns: i64) -> Session {
        Session::new(id, test_addr(), Vector2::new(0.0, 0.0), now_ns)
    }

    #[test]
    fn test_session_creation() {
        let s = session(7, 100);
        assert_eq!(s.session_id, 7);
        assert_eq!(s.addr, test_addr());
        assert_eq!(s.last_heard_ns, 100);
        assert_eq!(s.last_ack, 0);
        assert!(!s.dirty);
    }

    #[test]
    fn test_touch_retargets_address() {
        let mut s = session(7, 0);
        s.touch(test_addr2(), 50);
        assert_eq!(s.addr, test_addr2());
        assert_eq!(s.last_heard_ns, 50);
    }

    #[test]
    fn test_accept_sequence_rejects_stale() {
        let mut s = session(1, 0);
        assert!(s.accept_sequence(1));
        assert!(s.accept_sequence(3));
        assert!(!s.accept_sequence(2));
        assert!(!s.accept_sequence(3));
        assert_eq!(s.last_ack, 3);
    }

    #[test]
    fn test_staleness_is_strictly_greater() {
        let s = session(1, 0);
        let timeout = 30 * NANOS_PER_SEC;
        assert!(!s.is_stale(timeout, timeout));
        assert!(s.is_stale(timeout + 1, timeout));
    }

    #[test]
    fn test_table_capacity() {
        let mut table = SessionTable::new(1);
        assert!(table.is_empty());
        assert!(table.insert(session(1, 0)));
        assert!(!table.insert(session(2, 0)));
        assert_eq!(table.len(), 1);
        assert!(table.contains(1));
        assert!(!table.contains(2));
    }

    #[test]
    fn test_remove_session() {
        let mut table = SessionTable::new(4);
        table.insert(session(1, 0));
        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_collect_stale() {
        let mut table = SessionTable::new(MAX_SESSIONS);
        table.insert(session(1, 0));
        table.insert(session(2, 20 * NANOS_PER_SEC));

        let mut scratch = [0u32; MAX_SESSIONS];
        let count = table.collect_stale(31 * NANOS_PER_SEC, 30 * NANOS_PER_SEC, &mut scratch);
        assert_eq!(count, 1);
        assert_eq!(scratch[0], 1);
    }

    #[test]
    fn test_roster_snapshot() {
        let mut table = SessionTable::new(MAX_SESSIONS);
        let mut s = session(9, 0);
        s.state = Vector2::new(12.0, 34.0);
        table.insert(s);

        let roster = table.roster();
        assert_eq!(roster.count, 1);
        assert_eq!(roster.entries()[0].session_id, 9);
        assert_eq!(roster.entries()[0].x, 12.0);
        assert_eq!(roster.entries()[0].y, 34.0);
    }
}
