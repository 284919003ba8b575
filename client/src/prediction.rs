//! Client-side prediction, server reconciliation and snapshot interpolation
//!
//! Local input is applied immediately and remembered as a pending move until
//! the server acknowledges its sequence number. Every authoritative position
//! is taken as the new base and the still-unacknowledged moves are replayed
//! on top of it with the same integrator the server runs, so a correct
//! prediction reconciles to exactly the position already on screen.
//!
//! All state sits behind one mutex shared by the render thread (prediction,
//! sampling) and the network thread (reconciliation). Calls happen at frame
//! and packet rate, so the lock is never contended for long.

use crate::ring::FixedRing;
use log::debug;
use shared::clock::NANOS_PER_MILLI;
use shared::protocol::sequence_greater_than;
use shared::{integrate, MovementCommand, Vector2, WorldQuery};
use std::sync::{Mutex, MutexGuard};

pub const PENDING_CAPACITY: usize = 32;
pub const SNAPSHOT_CAPACITY: usize = 32;
/// How far behind real time the local player is rendered
pub const INTERPOLATION_DELAY_NS: i64 = 45 * NANOS_PER_MILLI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMove {
    pub seq: u32,
    pub cmd: MovementCommand,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub timestamp: i64,
    pub pos: Vector2,
}

struct Inner {
    pending: FixedRing<PendingMove, PENDING_CAPACITY>,
    snapshots: FixedRing<Snapshot, SNAPSHOT_CAPACITY>,
    next_seq: u32,
    predicted: Vector2,
}

pub struct PredictionEngine {
    inner: Mutex<Inner>,
}

impl PredictionEngine {
    pub fn new(start: Vector2) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: FixedRing::new(),
                snapshots: FixedRing::new(),
                next_seq: 1,
                predicted: start,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records `cmd` as pending and returns the sequence to send it with.
    pub fn push_input(&self, cmd: MovementCommand) -> u32 {
        push_pending(&mut self.lock(), cmd)
    }

    /// Records `cmd`, applies it to the predicted position and snapshots the
    /// result at `now_ns`. Returns the move's sequence and the new position.
    pub fn predict(&self, cmd: MovementCommand, world: &impl WorldQuery, now_ns: i64) -> (u32, Vector2) {
        let mut inner = self.lock();
        let seq = push_pending(&mut inner, cmd);
        let pos = integrate(inner.predicted, &cmd, world);
        inner.predicted = pos;
        push_snapshot(&mut inner, now_ns, pos);
        (seq, pos)
    }

    /// Drops every pending move the server has applied (`seq <= ack`) and
    /// replays the rest, in order, on top of `server_pos`.
    ///
    /// The caller stores the returned position as a new snapshot.
    pub fn reconcile_state(&self, ack: u32, server_pos: Vector2, world: &impl WorldQuery) -> Vector2 {
        let mut inner = self.lock();
        inner.pending.retain(|m| sequence_greater_than(m.seq, ack));

        let mut pos = server_pos;
        for pending in inner.pending.iter() {
            pos = integrate(pos, &pending.cmd, world);
        }

        if pos != inner.predicted {
            debug!(
                "Reconciled ({:.2}, {:.2}) -> ({:.2}, {:.2}), {} moves in flight",
                inner.predicted.x,
                inner.predicted.y,
                pos.x,
                pos.y,
                inner.pending.len()
            );
        }
        inner.predicted = pos;
        pos
    }

    pub fn push_snapshot(&self, timestamp: i64, pos: Vector2) {
        push_snapshot(&mut self.lock(), timestamp, pos);
    }

    /// Position to render at `now_ns`, sampled `INTERPOLATION_DELAY_NS` in
    /// the past between the two bracketing snapshots.
    ///
    /// Clamps to the oldest or newest snapshot outside the stored range and
    /// never extrapolates. Returns `None` only before the first snapshot.
    pub fn sample_interpolated(&self, now_ns: i64) -> Option<Vector2> {
        let inner = self.lock();
        let snapshots = &inner.snapshots;
        let oldest = snapshots.first()?;
        let newest = snapshots.last()?;

        let render_time = now_ns.saturating_sub(INTERPOLATION_DELAY_NS);
        if render_time <= oldest.timestamp {
            return Some(oldest.pos);
        }
        if render_time >= newest.timestamp {
            return Some(newest.pos);
        }

        let mut before = oldest;
        for after in snapshots.iter().skip(1) {
            if after.timestamp > render_time {
                let span = (after.timestamp - before.timestamp) as f64;
                let t = ((render_time - before.timestamp) as f64 / span) as f32;
                return Some(before.pos.lerp(after.pos, t));
            }
            before = after;
        }
        Some(newest.pos)
    }

    pub fn predicted(&self) -> Vector2 {
        self.lock().predicted
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Sequence numbers still awaiting acknowledgement, oldest first.
    pub fn pending_sequences(&self) -> Vec<u32> {
        self.lock().pending.iter().map(|m| m.seq).collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots.len()
    }
}

fn push_pending(inner: &mut Inner, cmd: MovementCommand) -> u32 {
    let seq = inner.next_seq;
    inner.next_seq = inner.next_seq.wrapping_add(1);
    if let Some(dropped) = inner.pending.push(PendingMove { seq, cmd }) {
        debug!("Pending moves full, forgot move {}", dropped.seq);
    }
    seq
}

// Timestamps are kept non-decreasing so the ring stays sorted even when the
// two threads race to push.
fn push_snapshot(inner: &mut Inner, timestamp: i64, pos: Vector2) {
    let timestamp = inner
        .snapshots
        .last()
        .map_or(timestamp, |last| timestamp.max(last.timestamp));
    inner.snapshots.push(Snapshot { timestamp, pos });
}
