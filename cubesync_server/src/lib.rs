//! `cubesync_server`
//!
//! Server-side systems:
//! - Connection registry (transport handle to player identity)
//! - Authoritative player list
//! - Message handling with ownership checks
//! - Periodic full-state broadcast
//!
//! Networking model:
//! - One UDP port, connection-oriented framing from `cubesync_shared::transport`
//! - JSON payloads from `cubesync_shared::message`

pub mod registry;
pub mod server;
pub mod world;

pub use server::GameServer;
