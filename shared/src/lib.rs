//! # Shared Game Library
//!
//! Code that must behave identically on the authoritative server and on the
//! predicting client: the binary wire protocol, the movement integrator and
//! the world geometry it queries, plus the lock-free handoff primitives both
//! sides use to move data between threads without blocking.
//!
//! ## Modules
//!
//! - [`protocol`]: 19-byte header, typed payloads, allocation-free codec
//! - [`movement`]: displacement, clamping and leading-edge collision
//! - [`world`]: tile walkability, building AABBs and plot records
//! - [`double_buffer`]: single-writer/single-reader swap of two instances
//! - [`spsc`]: fixed-capacity single-producer/single-consumer ring
//! - [`clock`]: monotonic and wall-clock timestamps in nanoseconds

pub mod clock;
pub mod double_buffer;
pub mod movement;
pub mod protocol;
pub mod spsc;
pub mod world;

pub use movement::{integrate, MovementCommand, PlayerState, Vector2};
pub use protocol::{Direction, Packet, Payload};
pub use world::{PlotSource, TileWorld, WorldQuery};

pub const PLAYER_SIZE: f32 = 16.0;
pub const DEFAULT_PORT: u16 = 9999;
pub const SPAWN_POSITION: Vector2 = Vector2::new(0.0, 0.0);
