//! Remote peers as seen by the renderer
//!
//! Peers are never simulated locally. Each roster broadcast is diffed against
//! the previous one to infer whether a peer is walking and which way it faces.
//! The network thread rebuilds the whole map into the back buffer of a
//! [`double_buffer`] and publishes it; the render thread reads the front
//! buffer without taking a lock.

use log::debug;
use shared::clock::NANOS_PER_MILLI;
use shared::double_buffer::{double_buffer, Publisher, ReadGuard, Reader};
use shared::protocol::AllPlayersState;
use shared::{Direction, Vector2};
use std::collections::HashMap;

/// Updates further apart than this never count as motion
pub const PEER_STALE_NS: i64 = 250 * NANOS_PER_MILLI;
/// Displacement below this is float jitter, not movement
pub const MOVE_THRESHOLD: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OtherPlayerState {
    pub pos: Vector2,
    pub last_update_ns: i64,
    pub dir: Direction,
    pub is_moving: bool,
}

impl OtherPlayerState {
    pub fn spawned(pos: Vector2, now_ns: i64) -> Self {
        Self {
            pos,
            last_update_ns: now_ns,
            dir: Direction::default(),
            is_moving: false,
        }
    }

    /// The state after a new broadcast position arrived at `now_ns`.
    pub fn advance(&self, pos: Vector2, now_ns: i64) -> Self {
        let dx = pos.x - self.pos.x;
        let dy = pos.y - self.pos.y;
        let fresh = now_ns.saturating_sub(self.last_update_ns) <= PEER_STALE_NS;
        let is_moving = fresh && (dx * dx + dy * dy).sqrt() > MOVE_THRESHOLD;

        let dir = if !is_moving {
            self.dir
        } else if dx.abs() > dy.abs() {
            if dx > 0.0 {
                Direction::Right
            } else {
                Direction::Left
            }
        } else if dy > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        };

        Self {
            pos,
            last_update_ns: now_ns,
            dir,
            is_moving,
        }
    }

    /// Whether to play the walk animation at `now_ns`. A peer that stopped
    /// being reported as moving decays to idle once its update goes stale.
    pub fn is_animating(&self, now_ns: i64) -> bool {
        self.is_moving && now_ns.saturating_sub(self.last_update_ns) <= PEER_STALE_NS
    }
}

pub type PeerMap = HashMap<u32, OtherPlayerState>;

/// Network-thread half
pub struct PeerPublisher {
    publisher: Publisher<PeerMap>,
    local_session: u32,
}

/// Render-thread half
pub struct PeerView {
    reader: Reader<PeerMap>,
}

pub fn peer_map(local_session: u32) -> (PeerPublisher, PeerView) {
    let (publisher, reader) = double_buffer(PeerMap::new());
    (
        PeerPublisher {
            publisher,
            local_session,
        },
        PeerView { reader },
    )
}

impl PeerPublisher {
    /// Replaces the peer map with `roster`, excluding the local player.
    ///
    /// Returns false if the renderer still held the back buffer and this
    /// roster was skipped; the next broadcast publishes in full.
    pub fn apply_roster(&mut self, roster: &AllPlayersState, now_ns: i64) -> bool {
        let local = self.local_session;
        let published = self.publisher.publish_with(|front, back| {
            back.clear();
            for entry in roster.entries() {
                if entry.session_id == local {
                    continue;
                }
                let pos = Vector2::new(entry.x, entry.y);
                let state = match front.get(&entry.session_id) {
                    Some(prev) => prev.advance(pos, now_ns),
                    None => OtherPlayerState::spawned(pos, now_ns),
                };
                back.insert(entry.session_id, state);
            }
        });
        if !published {
            debug!("Renderer still reading peer buffer, skipped roster");
        }
        published
    }

    /// The most recently published map.
    pub fn current(&self) -> &PeerMap {
        self.publisher.current()
    }
}

impl PeerView {
    pub fn read(&mut self) -> ReadGuard<'_, PeerMap> {
        self.reader.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::PlayerEntry;

    const MS: i64 = NANOS_PER_MILLI;

    fn roster(entries: &[(u32, f32, f32)]) -> AllPlayersState {
        let mut roster = AllPlayersState::default();
        for &(session_id, x, y) in entries {
            roster.push(PlayerEntry { session_id, x, y });
        }
        roster
    }

    #[test]
    fn test_horizontal_wins_when_larger() {
        let prev = OtherPlayerState::spawned(Vector2::new(0.0, 0.0), 0);
        let next = prev.advance(Vector2::new(-3.0, 1.0), 50 * MS);
        assert!(next.is_moving);
        assert_eq!(next.dir, Direction::Left);
    }

    #[test]
    fn test_ties_go_vertical() {
        let prev = OtherPlayerState::spawned(Vector2::new(0.0, 0.0), 0);
        let next = prev.advance(Vector2::new(2.0, -2.0), 50 * MS);
        assert_eq!(next.dir, Direction::Up);
        let next = prev.advance(Vector2::new(2.0, 2.0), 50 * MS);
        assert_eq!(next.dir, Direction::Down);
    }

    #[test]
    fn test_jitter_is_not_movement() {
        let mut prev = OtherPlayerState::spawned(Vector2::new(0.0, 0.0), 0);
        prev.dir = Direction::Left;
        let next = prev.advance(Vector2::new(0.1, 0.2), 50 * MS);
        assert!(!next.is_moving);
        assert_eq!(next.dir, Direction::Left);
    }

    #[test]
    fn test_stale_update_is_not_movement() {
        let mut prev = OtherPlayerState::spawned(Vector2::new(0.0, 0.0), 0);
        prev.dir = Direction::Up;
        let next = prev.advance(Vector2::new(40.0, 0.0), 300 * MS);
        assert!(!next.is_moving);
        assert_eq!(next.dir, Direction::Up);
        assert_eq!(next.pos, Vector2::new(40.0, 0.0));
    }

    #[test]
    fn test_animation_decays_when_updates_stop() {
        let prev = OtherPlayerState::spawned(Vector2::new(0.0, 0.0), 0);
        let next = prev.advance(Vector2::new(5.0, 0.0), 50 * MS);
        assert!(next.is_animating(100 * MS));
        assert!(!next.is_animating(400 * MS));
    }

    #[test]
    fn test_roster_excludes_local_player_and_drops_departed() {
        let (mut publisher, mut view) = peer_map(1);
        assert!(publisher.apply_roster(&roster(&[(1, 0.0, 0.0), (2, 10.0, 10.0), (3, 5.0, 5.0)]), 0));
        {
            let peers = view.read();
            assert_eq!(peers.len(), 2);
            assert!(!peers.contains_key(&1));
        }

        assert!(publisher.apply_roster(&roster(&[(1, 0.0, 0.0), (2, 14.0, 10.0)]), 50 * MS));
        let peers = view.read();
        assert_eq!(peers.len(), 1);
        let peer = peers[&2];
        assert!(peer.is_moving);
        assert_eq!(peer.dir, Direction::Right);
    }

    #[test]
    fn test_inference_uses_previous_broadcast() {
        let (mut publisher, _view) = peer_map(0);
        publisher.apply_roster(&roster(&[(2, 0.0, 0.0)]), 0);
        publisher.apply_roster(&roster(&[(2, 0.0, 8.0)]), 50 * MS);
        publisher.apply_roster(&roster(&[(2, 0.0, 8.0)]), 100 * MS);
        let peer = publisher.current()[&2];
        assert!(!peer.is_moving);
        assert_eq!(peer.dir, Direction::Down);
    }
}
