//! Loopback transport for in-memory client-server communication.
//!
//! Keeps server and any number of clients in one process without touching
//! the network stack. Nothing happens on a timer: a client connects when the
//! server calls `accept`, and data shows up in the peer's queue on `send`.
//! That makes multi-client scenarios step-by-step deterministic in tests.
//!
//! `LoopbackNetwork::set_delivery` and `sever` stand in for packet loss and
//! link failure. A link is released once both ends are closed and its queues
//! are drained.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tracing::trace;

use super::{
    ClientTransport, ConnectionHandle, ConnectionState, DisconnectReason, NetEvent,
    ServerTransport, TransportError, TransportResult,
};

#[derive(Debug)]
struct Link {
    server_open: bool,
    client_state: ConnectionState,
    to_server: VecDeque<NetEvent>,
    to_client: VecDeque<NetEvent>,
    deliver_to_client: bool,
}

#[derive(Debug, Default)]
struct Hub {
    links: HashMap<ConnectionHandle, Link>,
    pending: VecDeque<ConnectionHandle>,
    next_handle: u32,
}

impl Hub {
    fn reap(&mut self, handle: ConnectionHandle) {
        let closed = self.links.get(&handle).is_some_and(|link| {
            !link.server_open
                && link.client_state == ConnectionState::Disconnected
                && link.to_server.is_empty()
                && link.to_client.is_empty()
        });
        if closed {
            self.links.remove(&handle);
            trace!(%handle, "Loopback link released");
        }
    }
}

/// Shared in-memory "network" that loopback endpoints attach to.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listening endpoint. A network has one logical server; every call
    /// returns a view of the same accept queue.
    pub fn server(&self) -> LoopbackServer {
        LoopbackServer {
            hub: Arc::clone(&self.hub),
        }
    }

    /// Starts a new client connection. It stays `Connecting` until the server
    /// accepts it.
    pub fn connect(&self) -> LoopbackClient {
        let handle = with_hub(&self.hub, |hub| {
            hub.next_handle += 1;
            let handle = ConnectionHandle::new(hub.next_handle);
            hub.links.insert(
                handle,
                Link {
                    server_open: false,
                    client_state: ConnectionState::Connecting,
                    to_server: VecDeque::new(),
                    to_client: VecDeque::new(),
                    deliver_to_client: true,
                },
            );
            hub.pending.push_back(handle);
            handle
        });
        LoopbackClient {
            hub: Arc::clone(&self.hub),
            handle,
        }
    }

    /// Links not yet released.
    pub fn link_count(&self) -> usize {
        with_hub(&self.hub, |hub| hub.links.len())
    }

    /// When `deliver` is false, server sends to `conn` are silently lost.
    pub fn set_delivery(&self, conn: ConnectionHandle, deliver: bool) {
        with_hub(&self.hub, |hub| {
            if let Some(link) = hub.links.get_mut(&conn) {
                link.deliver_to_client = deliver;
            }
        });
    }

    /// Breaks the link; both ends see `Disconnect(Timeout)`.
    pub fn sever(&self, conn: ConnectionHandle) {
        with_hub(&self.hub, |hub| {
            if let Some(link) = hub.links.get_mut(&conn) {
                if link.server_open {
                    link.server_open = false;
                    link.to_server
                        .push_back(NetEvent::Disconnect(DisconnectReason::Timeout));
                }
                if link.client_state != ConnectionState::Disconnected {
                    link.client_state = ConnectionState::Disconnected;
                    link.to_client
                        .push_back(NetEvent::Disconnect(DisconnectReason::Timeout));
                }
            }
            hub.reap(conn);
        });
    }
}

fn with_hub<R>(hub: &Mutex<Hub>, f: impl FnOnce(&mut Hub) -> R) -> R {
    let mut guard = hub.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Server end of a `LoopbackNetwork`.
#[derive(Debug, Clone)]
pub struct LoopbackServer {
    hub: Arc<Mutex<Hub>>,
}

impl ServerTransport for LoopbackServer {
    fn update(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn accept(&mut self) -> Option<ConnectionHandle> {
        with_hub(&self.hub, |hub| {
            while let Some(handle) = hub.pending.pop_front() {
                let Some(link) = hub.links.get_mut(&handle) else {
                    continue;
                };
                if link.client_state != ConnectionState::Connecting {
                    continue;
                }
                link.server_open = true;
                link.client_state = ConnectionState::Connected;
                link.to_client.push_back(NetEvent::Connect);
                return Some(handle);
            }
            None
        })
    }

    fn pop_event(&mut self, conn: ConnectionHandle) -> Option<NetEvent> {
        with_hub(&self.hub, |hub| {
            let event = hub
                .links
                .get_mut(&conn)
                .and_then(|link| link.to_server.pop_front());
            hub.reap(conn);
            event
        })
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) -> TransportResult<()> {
        with_hub(&self.hub, |hub| {
            let link = hub
                .links
                .get_mut(&conn)
                .ok_or(TransportError::UnknownConnection(conn))?;
            if !link.server_open {
                return Err(TransportError::NotConnected);
            }
            if link.deliver_to_client {
                link.to_client
                    .push_back(NetEvent::Data(Bytes::copy_from_slice(payload)));
            } else {
                trace!(%conn, "Loopback delivery disabled, payload lost");
            }
            Ok(())
        })
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        with_hub(&self.hub, |hub| {
            if let Some(link) = hub.links.get_mut(&conn) {
                link.to_server.clear();
                if link.server_open {
                    link.server_open = false;
                    if link.client_state == ConnectionState::Connected {
                        link.client_state = ConnectionState::Disconnected;
                        link.to_client
                            .push_back(NetEvent::Disconnect(DisconnectReason::Closed));
                    }
                }
            }
            hub.reap(conn);
        });
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        with_hub(&self.hub, |hub| {
            hub.links
                .get(&conn)
                .is_some_and(|link| link.server_open || !link.to_server.is_empty())
        })
    }
}

/// Client end of a `LoopbackNetwork`.
#[derive(Debug)]
pub struct LoopbackClient {
    hub: Arc<Mutex<Hub>>,
    handle: ConnectionHandle,
}

impl LoopbackClient {
    /// The handle the server sees for this client.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }
}

impl ClientTransport for LoopbackClient {
    fn update(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn pop_event(&mut self) -> Option<NetEvent> {
        let handle = self.handle;
        with_hub(&self.hub, |hub| {
            let event = hub
                .links
                .get_mut(&handle)
                .and_then(|link| link.to_client.pop_front());
            hub.reap(handle);
            event
        })
    }

    fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        let handle = self.handle;
        with_hub(&self.hub, |hub| {
            let link = hub
                .links
                .get_mut(&handle)
                .ok_or(TransportError::NotConnected)?;
            if link.client_state != ConnectionState::Connected || !link.server_open {
                return Err(TransportError::NotConnected);
            }
            link.to_server
                .push_back(NetEvent::Data(Bytes::copy_from_slice(payload)));
            Ok(())
        })
    }

    fn disconnect(&mut self) {
        let handle = self.handle;
        with_hub(&self.hub, |hub| {
            if let Some(link) = hub.links.get_mut(&handle) {
                link.to_client.clear();
                if link.client_state == ConnectionState::Connected && link.server_open {
                    link.server_open = false;
                    link.to_server
                        .push_back(NetEvent::Disconnect(DisconnectReason::Closed));
                }
                link.client_state = ConnectionState::Disconnected;
            }
            hub.reap(handle);
        });
    }

    fn state(&self) -> ConnectionState {
        let handle = self.handle;
        with_hub(&self.hub, |hub| {
            hub.links
                .get(&handle)
                .map_or(ConnectionState::Disconnected, |link| link.client_state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_is_reported_after_accept() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut client = net.connect();

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(client.pop_event().is_none());

        let conn = server.accept().unwrap();
        assert_eq!(conn, client.handle());
        assert!(server.accept().is_none());
        assert_eq!(client.pop_event(), Some(NetEvent::Connect));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn data_flows_both_ways_in_order() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut client = net.connect();
        let conn = server.accept().unwrap();
        client.pop_event();

        client.send(b"one").unwrap();
        client.send(b"two").unwrap();
        assert_eq!(server.pop_event(conn), Some(NetEvent::Data(Bytes::from_static(b"one"))));
        assert_eq!(server.pop_event(conn), Some(NetEvent::Data(Bytes::from_static(b"two"))));
        assert_eq!(server.pop_event(conn), None);

        server.send(conn, b"back").unwrap();
        assert_eq!(client.pop_event(), Some(NetEvent::Data(Bytes::from_static(b"back"))));
    }

    #[test]
    fn client_disconnect_closes_server_side() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut client = net.connect();
        let conn = server.accept().unwrap();

        client.disconnect();
        assert!(matches!(server.send(conn, b"x"), Err(TransportError::NotConnected)));
        // Still live until the application has seen the disconnect.
        assert!(server.is_live(conn));
        assert_eq!(
            server.pop_event(conn),
            Some(NetEvent::Disconnect(DisconnectReason::Closed))
        );
        assert!(!server.is_live(conn));
    }

    #[test]
    fn closed_links_are_released_once_drained() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut a = net.connect();
        let mut b = net.connect();
        let a_conn = server.accept().unwrap();
        let b_conn = server.accept().unwrap();
        assert_eq!(net.link_count(), 2);

        // Client closes: held until the server has read the notice.
        a.disconnect();
        assert_eq!(net.link_count(), 2);
        server.pop_event(a_conn);
        assert_eq!(net.link_count(), 1);
        assert_eq!(a.state(), ConnectionState::Disconnected);
        assert!(!server.is_live(a_conn));

        // Server closes: held until the client has read its queue.
        server.disconnect(b_conn);
        assert_eq!(b.pop_event(), Some(NetEvent::Connect));
        assert_eq!(net.link_count(), 1);
        assert_eq!(
            b.pop_event(),
            Some(NetEvent::Disconnect(DisconnectReason::Closed))
        );
        assert_eq!(net.link_count(), 0);
        assert_eq!(b.state(), ConnectionState::Disconnected);
        assert!(matches!(b.send(b"x"), Err(TransportError::NotConnected)));

        // Severed, and abandoned before accept.
        let mut c = net.connect();
        let c_conn = server.accept().unwrap();
        net.sever(c_conn);
        server.pop_event(c_conn);
        c.pop_event();
        c.pop_event();
        let mut d = net.connect();
        d.disconnect();
        assert!(server.accept().is_none());
        assert_eq!(net.link_count(), 0);
    }

    #[test]
    fn disabled_delivery_loses_server_sends() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut client = net.connect();
        let conn = server.accept().unwrap();
        client.pop_event();

        net.set_delivery(conn, false);
        server.send(conn, b"lost").unwrap();
        assert!(client.pop_event().is_none());

        net.set_delivery(conn, true);
        server.send(conn, b"kept").unwrap();
        assert_eq!(client.pop_event(), Some(NetEvent::Data(Bytes::from_static(b"kept"))));
    }

    #[test]
    fn sever_notifies_both_ends() {
        let net = LoopbackNetwork::new();
        let mut server = net.server();
        let mut client = net.connect();
        let conn = server.accept().unwrap();
        client.pop_event();

        net.sever(conn);
        assert_eq!(
            server.pop_event(conn),
            Some(NetEvent::Disconnect(DisconnectReason::Timeout))
        );
        assert_eq!(
            client.pop_event(),
            Some(NetEvent::Disconnect(DisconnectReason::Timeout))
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
