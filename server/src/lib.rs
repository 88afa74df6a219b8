//! # Stackbattle Server Library
//!
//! Authoritative server core for a competitive multiplayer falling-block
//! game. The server is the single source of truth for every board: clients
//! only render state and forward intents (move, rotate, drop, hold), while
//! all simulation, scoring and cross-player effects happen here.
//!
//! ## Architecture
//!
//! The server runs a single-threaded, event-driven loop that multiplexes
//! inbound client packets with a fixed 50Hz simulation tick. Serializing
//! every state mutation through that one task keeps the N per-player board
//! simulations deterministic and makes cross-player attack resolution safe
//! without locks: attack power produced by one player's tick is consumed
//! before any player's transient outputs are cleared.
//!
//! ## Module Organization
//!
//! - [`pieces`]: the seven-piece catalog and its injectable random source
//! - [`board`]: pure board/piece kinematics — collision, rotation with
//!   wall kicks, line clears, garbage injection
//! - [`scoring`]: attack power, combos, lucky events, experience and
//!   level progression
//! - [`player`]: player records and the registry that owns them
//! - [`game`]: the match orchestrator — tick pipeline, attack resolution,
//!   and the elimination/continue negotiation protocol
//! - [`network`]: the UDP transport adapter and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 50Hz tick, up to 8 players, entropy-seeded randomness.
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(20),
//!         8,
//!         None,
//!     ).await?;
//!
//!     // Runs the main loop: intents in, per-tick simulation, snapshot
//!     // broadcasts out, elimination negotiations on their own timers.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod game;
pub mod network;
pub mod pieces;
pub mod player;
pub mod scoring;
