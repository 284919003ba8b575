//! # Game Client Library
//!
//! The predicting half of the tile-world netcode. The client applies its own
//! input immediately, tags each move with a sequence number and later replays
//! whatever the server has not yet acknowledged on top of each authoritative
//! position. Remote players are only ever displayed, never simulated.
//!
//! ## Threads
//!
//! The render thread samples the keyboard, predicts, and draws. The network
//! thread owns the socket, reconciles and rebuilds the peer map. They share:
//!
//! - a [`prediction::PredictionEngine`] behind a single mutex,
//! - a lock-free double-buffered peer map ([`peers`]),
//! - a channel carrying sequenced moves to the network thread,
//! - an atomic shutdown flag.
//!
//! ## Modules
//!
//! - [`ring`]: fixed-capacity ring that drops its oldest entry
//! - [`prediction`]: pending moves, reconciliation and snapshot interpolation
//! - [`peers`]: remote-peer motion inference and the published peer map
//! - [`network`]: the network thread and packet handling
//! - [`input`]: keyboard sampling into movement commands
//! - [`rendering`]: macroquad drawing of the world and players

pub mod input;
pub mod network;
pub mod peers;
pub mod prediction;
pub mod rendering;
pub mod ring;
