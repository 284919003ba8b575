//! Keyboard sampling into movement commands

use macroquad::prelude::*;
use shared::{Direction, MovementCommand};

/// Longest frame fed into a single move, in seconds. Avoids a single huge
/// step after the window was dragged or the process stalled.
pub const MAX_FRAME_DELTA: f32 = 1.0 / 20.0;

/// Held-key state for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldKeys {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl HeldKeys {
    /// Samples WASD and the arrow keys.
    pub fn sample() -> Self {
        Self {
            up: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            down: is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
            left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
        }
    }

    /// Moves are single-axis, so at most one direction is taken. Opposing
    /// keys cancel out.
    pub fn direction(&self) -> Option<Direction> {
        match (self.up, self.down, self.left, self.right) {
            (true, false, _, _) => Some(Direction::Up),
            (false, true, _, _) => Some(Direction::Down),
            (_, _, true, false) => Some(Direction::Left),
            (_, _, false, true) => Some(Direction::Right),
            _ => None,
        }
    }
}

pub struct InputManager {
    speed: f32,
    facing: Direction,
}

impl InputManager {
    pub fn new(speed: f32) -> Self {
        Self {
            speed,
            facing: Direction::default(),
        }
    }

    /// Builds this frame's move, if any key is held.
    pub fn command_for(&mut self, keys: HeldKeys, frame_delta: f32) -> Option<MovementCommand> {
        let direction = keys.direction()?;
        self.facing = direction;
        let delta = frame_delta.clamp(0.0, MAX_FRAME_DELTA);
        if delta == 0.0 {
            return None;
        }
        Some(MovementCommand::new(direction, self.speed, delta))
    }

    /// Samples the keyboard for the current macroquad frame.
    pub fn update(&mut self) -> Option<MovementCommand> {
        self.command_for(HeldKeys::sample(), get_frame_time())
    }

    /// Last direction the local player moved in
    pub fn facing(&self) -> Direction {
        self.facing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(up: bool, down: bool, left: bool, right: bool) -> HeldKeys {
        HeldKeys {
            up,
            down,
            left,
            right,
        }
    }

    #[test]
    fn test_single_key_directions() {
        assert_eq!(keys(true, false, false, false).direction(), Some(Direction::Up));
        assert_eq!(keys(false, true, false, false).direction(), Some(Direction::Down));
        assert_eq!(keys(false, false, true, false).direction(), Some(Direction::Left));
        assert_eq!(keys(false, false, false, true).direction(), Some(Direction::Right));
        assert_eq!(HeldKeys::default().direction(), None);
    }

    #[test]
    fn test_vertical_takes_priority_and_opposites_cancel() {
        assert_eq!(keys(true, false, false, true).direction(), Some(Direction::Up));
        assert_eq!(keys(true, true, false, true).direction(), Some(Direction::Right));
        assert_eq!(keys(true, true, true, true).direction(), None);
    }

    #[test]
    fn test_command_uses_speed_and_clamped_delta() {
        let mut input = InputManager::new(120.0);
        let cmd = input
            .command_for(keys(false, false, false, true), 0.016)
            .unwrap();
        assert_eq!(cmd.direction, Direction::Right);
        assert_eq!(cmd.speed, 120.0);
        assert_eq!(cmd.delta, 0.016);

        let cmd = input.command_for(keys(false, true, false, false), 2.0).unwrap();
        assert_eq!(cmd.delta, MAX_FRAME_DELTA);
        assert_eq!(input.facing(), Direction::Down);
    }

    #[test]
    fn test_no_keys_no_command() {
        let mut input = InputManager::new(120.0);
        assert!(input.command_for(HeldKeys::default(), 0.016).is_none());
        assert!(input
            .command_for(keys(true, false, false, false), 0.0)
            .is_none());
    }
}
