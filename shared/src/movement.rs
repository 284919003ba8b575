//! Authoritative movement integration shared by the server and client replay.
//!
//! A move displaces along one cardinal axis, clamps into the world, then tests
//! only the two leading-edge corners of the player box. A blocked move is
//! rejected whole: no sliding and no swept collision. Corner-diagonal geometry
//! can therefore be clipped through; that is the intended gameplay behavior.

use crate::protocol::{Direction, Move};
use crate::world::WorldQuery;
use crate::PLAYER_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, other: Vector2, t: f32) -> Vector2 {
        Vector2 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Authoritative per-session state as stored by the server and persistence.
pub type PlayerState = Vector2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementCommand {
    pub direction: Direction,
    pub speed: f32,
    pub delta: f32,
}

impl MovementCommand {
    pub fn new(direction: Direction, speed: f32, delta: f32) -> Self {
        Self {
            direction,
            speed,
            delta,
        }
    }

    pub fn amount(&self) -> f32 {
        self.speed * self.delta
    }
}

impl From<Move> for MovementCommand {
    fn from(m: Move) -> Self {
        Self::new(m.direction, m.speed, m.delta)
    }
}

impl From<MovementCommand> for Move {
    fn from(cmd: MovementCommand) -> Self {
        Move {
            direction: cmd.direction,
            speed: cmd.speed,
            delta: cmd.delta,
        }
    }
}

/// The two corners of the player box facing `direction`.
///
/// Corners name the last covered pixel, so the right/bottom edge sits at
/// `PLAYER_SIZE - 1` from the origin.
pub fn leading_corners(pos: Vector2, direction: Direction) -> [Vector2; 2] {
    let left = pos.x;
    let top = pos.y;
    let right = pos.x + PLAYER_SIZE - 1.0;
    let bottom = pos.y + PLAYER_SIZE - 1.0;
    match direction {
        Direction::Up => [Vector2::new(left, top), Vector2::new(right, top)],
        Direction::Down => [Vector2::new(left, bottom), Vector2::new(right, bottom)],
        Direction::Left => [Vector2::new(left, top), Vector2::new(left, bottom)],
        Direction::Right => [Vector2::new(right, top), Vector2::new(right, bottom)],
    }
}

pub fn is_blocked(pos: Vector2, direction: Direction, world: &impl WorldQuery) -> bool {
    leading_corners(pos, direction)
        .iter()
        .any(|c| !world.is_walkable(c.x, c.y) || world.building_blocks(c.x, c.y, 1.0, 1.0))
}

pub fn clamp_to_world(pos: Vector2, world: &impl WorldQuery) -> Vector2 {
    let max_x = (world.width_px() - PLAYER_SIZE).max(0.0);
    let max_y = (world.height_px() - PLAYER_SIZE).max(0.0);
    Vector2 {
        x: pos.x.clamp(0.0, max_x),
        y: pos.y.clamp(0.0, max_y),
    }
}

/// Applies one movement command. Returns `pos` unchanged if the move is blocked.
///
/// A negative amount would travel against `direction` while the opposite
/// corners are checked, so it is treated as no movement.
pub fn integrate(pos: Vector2, cmd: &MovementCommand, world: &impl WorldQuery) -> Vector2 {
    let amount = cmd.amount();
    if !amount.is_finite() || amount < 0.0 {
        return pos;
    }

    let mut next = pos;
    match cmd.direction {
        Direction::Up => next.y -= amount,
        Direction::Down => next.y += amount,
        Direction::Left => next.x -= amount,
        Direction::Right => next.x += amount,
    }
    let next = clamp_to_world(next, world);

    if is_blocked(next, cmd.direction, world) {
        pos
    } else {
        next
    }
}
