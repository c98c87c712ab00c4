//! `aram_server`
//!
//! Headless authoritative reference world:
//! - Level generation (boxes on a grid)
//! - Player join with spawn selection
//! - Processes `InputMessage`s with the shared physics step
//! - Produces per-recipient `SnapshotMessage`s
//!
//! There are no sockets here; a transport or the loopback harness moves
//! messages in and out.

pub mod level;
pub mod server;

pub use server::GameServer;
