//! `cubesync_client`
//!
//! Client-side systems:
//! - Connection management over `cubesync_shared::transport`
//! - Mirror of the server's player list, reconciled on every broadcast
//! - Periodic publishing of the local player's state
//! - Scripted input for the headless binary

pub mod client;
pub mod input;
pub mod mirror;

pub use client::GameClient;
