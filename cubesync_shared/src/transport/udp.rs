//! UDP transport.
//!
//! A thin connection layer over datagrams. Every datagram starts with a 5-byte
//! header:
//!
//! ```text
//! +------+----------------+-----------------+
//! | kind | token (u32 BE) | payload (Data)  |
//! +------+----------------+-----------------+
//! ```
//!
//! The server hands out a random token in `ConnectAccept`; later packets from
//! that address must carry it, which drops strays from an earlier connection
//! that reused the same client port. Connect requests are retried on a timer,
//! idle links are kept alive with heartbeats, and silent peers time out.
//!
//! After the first connect request, which is awaited while the fresh socket
//! becomes writable, all socket calls are `try_*`: `update` reads until
//! `WouldBlock` and a full send buffer drops the datagram, as an unreliable
//! transport may.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Instant,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::{
    BindError, ClientTransport, ConnectionHandle, ConnectionState, DisconnectReason, NetEvent,
    ServerTransport, TransportError, TransportResult,
};
use crate::config::TransportConfig;

const HEADER_LEN: usize = 5;

/// Largest IPv4 UDP payload.
const MAX_DATAGRAM: usize = 65_507;

/// Largest protocol payload one datagram can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM - HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketKind {
    ConnectRequest = 1,
    ConnectAccept = 2,
    Data = 3,
    Disconnect = 4,
    Heartbeat = 5,
}

impl PacketKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(PacketKind::ConnectRequest),
            2 => Some(PacketKind::ConnectAccept),
            3 => Some(PacketKind::Data),
            4 => Some(PacketKind::Disconnect),
            5 => Some(PacketKind::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Packet {
    kind: PacketKind,
    token: u32,
    payload: Bytes,
}

fn encode_packet(kind: PacketKind, token: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(kind as u8);
    buf.put_u32(token);
    buf.extend_from_slice(payload);
    buf
}

fn decode_packet(mut buf: &[u8]) -> Option<Packet> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let kind = PacketKind::from_u8(buf.get_u8())?;
    let token = buf.get_u32();
    Some(Packet {
        kind,
        token,
        payload: Bytes::copy_from_slice(buf),
    })
}

fn check_payload_len(payload: &[u8]) -> TransportResult<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(TransportError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

/// ICMP errors surfaced on later socket calls; the timeouts deal with them.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Open,
    Closed,
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    token: u32,
    state: PeerState,
    events: VecDeque<NetEvent>,
    last_recv: Instant,
    last_send: Instant,
}

/// Server side of the UDP transport.
pub struct UdpServerTransport {
    socket: UdpSocket,
    cfg: TransportConfig,
    peers: HashMap<ConnectionHandle, Peer>,
    by_addr: HashMap<SocketAddr, ConnectionHandle>,
    pending: VecDeque<ConnectionHandle>,
    next_handle: u32,
    recv_buf: Vec<u8>,
}

impl UdpServerTransport {
    /// Binds `port` on all IPv4 interfaces and starts listening.
    pub async fn bind(port: u16, cfg: TransportConfig) -> Result<Self, BindError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| BindError { port, source })?;
        Ok(Self {
            socket,
            cfg,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            pending: VecDeque::new(),
            next_handle: 1,
            recv_buf: vec![0u8; 64 * 1024],
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn send_raw(&self, addr: SocketAddr, packet: &[u8]) -> TransportResult<()> {
        match self.socket.try_send_to(packet, addr) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(%addr, "Send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn send_control(&mut self, conn: ConnectionHandle, kind: PacketKind) -> TransportResult<()> {
        let Some(peer) = self.peers.get(&conn) else {
            return Err(TransportError::UnknownConnection(conn));
        };
        let (addr, packet) = (peer.addr, encode_packet(kind, peer.token, &[]));
        self.send_raw(addr, &packet)?;
        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.last_send = Instant::now();
        }
        Ok(())
    }

    fn close(&mut self, conn: ConnectionHandle, reason: DisconnectReason) {
        if let Some(peer) = self.peers.get_mut(&conn) {
            if peer.state == PeerState::Open {
                peer.state = PeerState::Closed;
                peer.events.push_back(NetEvent::Disconnect(reason));
                self.by_addr.remove(&peer.addr);
                info!(%conn, addr = %peer.addr, ?reason, "Connection closed");
            }
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, len: usize) {
        let Some(packet) = decode_packet(&self.recv_buf[..len]) else {
            trace!(%from, len, "Dropping unparseable datagram");
            return;
        };

        if packet.kind == PacketKind::ConnectRequest {
            self.handle_connect_request(from);
            return;
        }

        let Some(&conn) = self.by_addr.get(&from) else {
            trace!(%from, kind = ?packet.kind, "Datagram from unknown address");
            return;
        };
        let Some(peer) = self.peers.get_mut(&conn) else {
            return;
        };
        if peer.token != packet.token {
            trace!(%conn, "Dropping datagram with stale token");
            return;
        }
        peer.last_recv = Instant::now();

        match packet.kind {
            PacketKind::Data => peer.events.push_back(NetEvent::Data(packet.payload)),
            PacketKind::Disconnect => self.close(conn, DisconnectReason::Closed),
            PacketKind::Heartbeat => {}
            PacketKind::ConnectRequest | PacketKind::ConnectAccept => {
                trace!(%conn, kind = ?packet.kind, "Ignoring control packet");
            }
        }
    }

    fn handle_connect_request(&mut self, from: SocketAddr) {
        if let Some(&conn) = self.by_addr.get(&from) {
            // Our accept was lost; answer again with the same token.
            if let Some(peer) = self.peers.get_mut(&conn) {
                peer.last_recv = Instant::now();
            }
            if let Err(e) = self.send_control(conn, PacketKind::ConnectAccept) {
                warn!(%conn, error = %e, "Failed to resend connect accept");
            }
            return;
        }

        let conn = ConnectionHandle::new(self.next_handle);
        self.next_handle += 1;
        let now = Instant::now();
        self.peers.insert(
            conn,
            Peer {
                addr: from,
                token: rand::random::<u32>(),
                state: PeerState::Open,
                events: VecDeque::new(),
                last_recv: now,
                last_send: now,
            },
        );
        self.by_addr.insert(from, conn);
        self.pending.push_back(conn);
        debug!(%conn, %from, "Connect request accepted");

        if let Err(e) = self.send_control(conn, PacketKind::ConnectAccept) {
            warn!(%conn, error = %e, "Failed to send connect accept");
        }
    }

    fn service_timers(&mut self) {
        let now = Instant::now();
        let mut timed_out = Vec::new();
        let mut heartbeat = Vec::new();
        for (&conn, peer) in &self.peers {
            if peer.state != PeerState::Open {
                continue;
            }
            if now.duration_since(peer.last_recv) >= self.cfg.disconnect_timeout() {
                timed_out.push(conn);
            } else if now.duration_since(peer.last_send) >= self.cfg.heartbeat_timeout() {
                heartbeat.push(conn);
            }
        }
        for conn in timed_out {
            self.close(conn, DisconnectReason::Timeout);
        }
        for conn in heartbeat {
            if let Err(e) = self.send_control(conn, PacketKind::Heartbeat) {
                debug!(%conn, error = %e, "Heartbeat send failed");
            }
        }
    }
}

impl ServerTransport for UdpServerTransport {
    fn update(&mut self) -> TransportResult<()> {
        loop {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok((n, from)) => self.handle_datagram(from, n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        self.service_timers();
        Ok(())
    }

    fn accept(&mut self) -> Option<ConnectionHandle> {
        while let Some(conn) = self.pending.pop_front() {
            if self.peers.contains_key(&conn) {
                return Some(conn);
            }
        }
        None
    }

    fn pop_event(&mut self, conn: ConnectionHandle) -> Option<NetEvent> {
        let peer = self.peers.get_mut(&conn)?;
        let event = peer.events.pop_front();
        if peer.state == PeerState::Closed && peer.events.is_empty() {
            self.peers.remove(&conn);
        }
        event
    }

    fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) -> TransportResult<()> {
        check_payload_len(payload)?;
        let peer = self
            .peers
            .get(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        if peer.state != PeerState::Open {
            return Err(TransportError::NotConnected);
        }
        let packet = encode_packet(PacketKind::Data, peer.token, payload);
        self.send_raw(peer.addr, &packet)?;
        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.last_send = Instant::now();
        }
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnectionHandle) {
        let open = self
            .peers
            .get(&conn)
            .is_some_and(|p| p.state == PeerState::Open);
        if open {
            if let Err(e) = self.send_control(conn, PacketKind::Disconnect) {
                debug!(%conn, error = %e, "Disconnect notice not sent");
            }
        }
        if let Some(peer) = self.peers.remove(&conn) {
            if self.by_addr.get(&peer.addr) == Some(&conn) {
                self.by_addr.remove(&peer.addr);
            }
        }
    }

    fn is_live(&self, conn: ConnectionHandle) -> bool {
        self.peers.contains_key(&conn)
    }
}

/// Client side of the UDP transport.
pub struct UdpClientTransport {
    socket: UdpSocket,
    server: SocketAddr,
    cfg: TransportConfig,
    state: ConnectionState,
    token: u32,
    events: VecDeque<NetEvent>,
    attempts: u32,
    last_attempt: Instant,
    last_recv: Instant,
    last_send: Instant,
    recv_buf: Vec<u8>,
}

impl UdpClientTransport {
    /// Binds an ephemeral local socket and sends the first connect request.
    ///
    /// Returns while the handshake is still in flight; a `Connect` event
    /// follows once the server answers.
    pub async fn connect(server: SocketAddr, cfg: TransportConfig) -> TransportResult<Self> {
        let local_ip = match server {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        socket.connect(server).await?;

        let now = Instant::now();
        let mut transport = Self {
            socket,
            server,
            cfg,
            state: ConnectionState::Connecting,
            token: 0,
            events: VecDeque::new(),
            attempts: 0,
            last_attempt: now,
            last_recv: now,
            last_send: now,
            recv_buf: vec![0u8; 64 * 1024],
        };
        transport.send_first_request().await?;
        info!(%server, "Connecting to server");
        Ok(transport)
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    fn send_raw(&mut self, packet: &[u8]) -> TransportResult<()> {
        match self.socket.try_send(packet) {
            Ok(_) => {
                self.last_send = Instant::now();
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Send buffer full, datagram dropped");
                Ok(())
            }
            // Refused before the server is up; the retry timer covers it.
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// A just-bound socket is not yet known writable, so `try_send` would
    /// drop this request.
    async fn send_first_request(&mut self) -> TransportResult<()> {
        self.attempts = 1;
        self.last_attempt = Instant::now();
        trace!(attempt = self.attempts, "Sending connect request");
        let packet = encode_packet(PacketKind::ConnectRequest, 0, &[]);
        match self.socket.send(&packet).await {
            Ok(_) => {
                self.last_send = Instant::now();
                Ok(())
            }
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn send_connect_request(&mut self) -> TransportResult<()> {
        self.attempts += 1;
        self.last_attempt = Instant::now();
        trace!(attempt = self.attempts, "Sending connect request");
        self.send_raw(&encode_packet(PacketKind::ConnectRequest, 0, &[]))
    }

    fn drop_connection(&mut self, reason: DisconnectReason) {
        self.state = ConnectionState::Disconnected;
        self.events.push_back(NetEvent::Disconnect(reason));
        info!(server = %self.server, ?reason, "Connection closed");
    }

    fn handle_datagram(&mut self, len: usize) {
        let Some(packet) = decode_packet(&self.recv_buf[..len]) else {
            trace!(len, "Dropping unparseable datagram");
            return;
        };

        match (self.state, packet.kind) {
            (ConnectionState::Connecting, PacketKind::ConnectAccept) => {
                self.token = packet.token;
                self.state = ConnectionState::Connected;
                self.last_recv = Instant::now();
                self.events.push_back(NetEvent::Connect);
                info!(server = %self.server, attempts = self.attempts, "Connection established");
            }
            (ConnectionState::Connected, kind) if packet.token == self.token => {
                self.last_recv = Instant::now();
                match kind {
                    PacketKind::Data => self.events.push_back(NetEvent::Data(packet.payload)),
                    PacketKind::Disconnect => self.drop_connection(DisconnectReason::Closed),
                    PacketKind::Heartbeat | PacketKind::ConnectAccept => {}
                    PacketKind::ConnectRequest => trace!("Ignoring connect request"),
                }
            }
            (state, kind) => {
                trace!(?state, ?kind, "Ignoring datagram");
            }
        }
    }

    fn service_timers(&mut self) -> TransportResult<()> {
        let now = Instant::now();
        match self.state {
            ConnectionState::Connecting => {
                if now.duration_since(self.last_attempt) < self.cfg.connect_timeout() {
                    return Ok(());
                }
                if self.attempts >= self.cfg.max_connect_attempts {
                    warn!(attempts = self.attempts, "Server did not answer");
                    self.drop_connection(DisconnectReason::ConnectFailed);
                    return Ok(());
                }
                self.send_connect_request()
            }
            ConnectionState::Connected => {
                if now.duration_since(self.last_recv) >= self.cfg.disconnect_timeout() {
                    self.drop_connection(DisconnectReason::Timeout);
                    return Ok(());
                }
                if now.duration_since(self.last_send) >= self.cfg.heartbeat_timeout() {
                    self.send_raw(&encode_packet(PacketKind::Heartbeat, self.token, &[]))?;
                }
                Ok(())
            }
            ConnectionState::Disconnected => Ok(()),
        }
    }
}

impl ClientTransport for UdpClientTransport {
    fn update(&mut self) -> TransportResult<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        loop {
            match self.socket.try_recv(&mut self.recv_buf) {
                Ok(n) => self.handle_datagram(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        self.service_timers()
    }

    fn pop_event(&mut self) -> Option<NetEvent> {
        self.events.pop_front()
    }

    fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        check_payload_len(payload)?;
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.send_raw(&encode_packet(PacketKind::Data, self.token, payload))
    }

    fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            let packet = encode_packet(PacketKind::Disconnect, self.token, &[]);
            if let Err(e) = self.send_raw(&packet) {
                debug!(error = %e, "Disconnect notice not sent");
            }
        }
        self.state = ConnectionState::Disconnected;
        self.events.clear();
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}
