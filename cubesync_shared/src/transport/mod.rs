//! Connection-oriented, unreliable message transport.
//!
//! Goals:
//! - One protocol payload per send/receive unit.
//! - Poll-driven and non-blocking: `update` does the pending I/O, then events
//!   are drained per connection until empty.
//! - Delivery is best effort; nothing is retried above the connection layer.
//!
//! Implementations:
//! - `udp`: real sockets (tokio `UdpSocket`, `try_*` calls only).
//! - `loopback`: in-process queues for single-process runs and tests.

pub mod loopback;
pub mod udp;

use std::{fmt, io};

use bytes::Bytes;

pub use loopback::{LoopbackClient, LoopbackNetwork, LoopbackServer};
pub use udp::{UdpClientTransport, UdpServerTransport, MAX_PAYLOAD_SIZE};

/// Transport-level handle of one server-side connection.
///
/// Ephemeral and never reused within a transport instance. Protocol identity
/// lives in the server's registry, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u32);

impl ConnectionHandle {
    pub const fn new(raw: u32) -> Self {
        ConnectionHandle(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the connection.
    Closed,
    /// Nothing was heard from the peer for the disconnect timeout.
    Timeout,
    /// Connect requests ran out without an answer.
    ConnectFailed,
}

/// Events popped from a connection's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// Client side only: the server accepted us.
    Connect,
    Data(Bytes),
    Disconnect(DisconnectReason),
}

/// Client-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Per-connection send/receive failure.
#[derive(Debug)]
pub enum TransportError {
    Io(io::Error),
    NotConnected,
    UnknownConnection(ConnectionHandle),
    PayloadTooLarge { len: usize, max: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "socket error: {e}"),
            TransportError::NotConnected => write!(f, "connection is not established"),
            TransportError::UnknownConnection(h) => write!(f, "unknown connection {h}"),
            TransportError::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {len} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The server could not bind its listen port.
#[derive(Debug)]
pub struct BindError {
    pub port: u16,
    pub source: io::Error,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to bind to port {}: {}", self.port, self.source)
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Listening side: many connections, each with its own event queue.
pub trait ServerTransport {
    /// Completes pending I/O: reads datagrams, fires timeouts and heartbeats.
    fn update(&mut self) -> TransportResult<()>;

    /// Takes the next newly established connection, if any.
    fn accept(&mut self) -> Option<ConnectionHandle>;

    /// Pops the oldest queued event of `conn`.
    fn pop_event(&mut self, conn: ConnectionHandle) -> Option<NetEvent>;

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) -> TransportResult<()>;

    /// Closes `conn` from this side. No `Disconnect` event is queued for it.
    fn disconnect(&mut self, conn: ConnectionHandle);

    /// Whether `conn` still exists for the application: established, or
    /// closed with events left to pop.
    fn is_live(&self, conn: ConnectionHandle) -> bool;
}

/// Connecting side: exactly one connection.
pub trait ClientTransport {
    fn update(&mut self) -> TransportResult<()>;

    fn pop_event(&mut self) -> Option<NetEvent>;

    fn send(&mut self, payload: &[u8]) -> TransportResult<()>;

    /// Closes the connection from this side and discards queued events.
    fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;
}
