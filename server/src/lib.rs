//! # Game Server Library
//!
//! The authoritative half of the tile-world netcode. The server owns the
//! canonical position of every player, integrates their `move` packets against
//! the same world geometry the clients predict with, and broadcasts the roster
//! so everyone converges on its view.
//!
//! ## Architecture
//!
//! A single thread owns the socket and all session state, so nothing on the
//! hot path takes a lock. The UDP socket is polled without blocking; each
//! datagram is decoded, applied and answered before the next is read.
//! Persistence runs on its own thread behind a fixed-size lock-free queue and
//! can never stall the simulation.
//!
//! ## Modules
//!
//! - [`session`]: per-player session records and the bounded session table
//! - [`game`]: packet handling, movement and housekeeping, free of I/O
//! - [`network`]: socket setup, the poll loop and outbound packets
//! - [`persistence`]: the player store and its background writer
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::GameServer;
//! use server::network::Server;
//! use server::persistence::{open_store, PERSIST_FLUSH_INTERVAL};
//! use shared::TileWorld;
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (store, worker) = open_store(Path::new("players.bin"), PERSIST_FLUSH_INTERVAL)?;
//!     let game = GameServer::new(TileWorld::builtin(), store);
//!     let mut server = Server::bind("0.0.0.0:9999".parse()?, game, 20)?;
//!
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!
//!     server.game_mut().persist_all();
//!     worker.stop();
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
pub mod persistence;
pub mod session;
