//! `cubesync_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One message vocabulary and codec for both sides.
//! - Transports behind traits so sessions run over UDP or in memory.
//! - No `unsafe`.

pub mod config;
pub mod dispatch;
pub mod math;
pub mod message;
pub mod player;
pub mod transport;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::dispatch::*;
    pub use crate::math::*;
    pub use crate::message::*;
    pub use crate::player::*;
    pub use crate::transport::*;
}
