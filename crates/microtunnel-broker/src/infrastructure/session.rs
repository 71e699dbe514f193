//! Control sessions and the proxy sessions they own.
//!
//! All socket access here is non-blocking (`try_read`, `try_recv_from`): the
//! reactor decides when to look at a socket and these types only report what
//! was ready.  Liveness is a flag; nothing is removed from a collection until
//! the reactor's cleanup pass calls [`ProxySet::retain_live`] or drops a dead
//! [`ClientSession`].

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use microtunnel_core::protocol::messages::{TCP_RELAY_CHUNK, UDP_DATAGRAM_MAX};
use microtunnel_core::{encode_response, AssemblyEvent, CloseCode, FrameAssembler, ProxyId, Response};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

// ── Proxy sessions ────────────────────────────────────────────────────────────

/// The socket behind a proxy session.
#[derive(Debug)]
pub enum ProxyKind {
    /// An outbound TCP connection opened by `OPEN_TCP`.
    Tcp(TcpStream),
    /// A UDP socket bound by `BIND_UDP`.
    Udp(UdpSocket),
}

/// One outbound TCP connection or bound UDP socket, tagged with the id the
/// control client chose for it.
#[derive(Debug)]
pub struct ProxySession {
    id: ProxyId,
    kind: ProxyKind,
    alive: bool,
}

impl ProxySession {
    pub fn tcp(id: ProxyId, stream: TcpStream) -> Self {
        Self {
            id,
            kind: ProxyKind::Tcp(stream),
            alive: true,
        }
    }

    pub fn udp(id: ProxyId, socket: UdpSocket) -> Self {
        Self {
            id,
            kind: ProxyKind::Udp(socket),
            alive: true,
        }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Flags the proxy for removal in the next cleanup pass.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    pub fn kind_mut(&mut self) -> &mut ProxyKind {
        &mut self.kind
    }

    /// Reads whatever the proxy socket has ready and turns it into a response.
    ///
    /// - TCP: up to 256 bytes become `RESP_RECV_TCP`; EOF or a read error
    ///   kills the proxy and yields `RESP_CLOSE`.
    /// - UDP: one datagram (truncated to 1024 bytes) becomes `RECV_DATA`; a
    ///   receive error kills the proxy silently.
    ///
    /// Returns `None` when nothing was ready or the proxy is already dead.
    pub fn poll_relay(&mut self) -> Option<Response> {
        if !self.alive {
            return None;
        }

        let id = self.id;
        match &self.kind {
            ProxyKind::Tcp(stream) => {
                let mut buf = [0u8; TCP_RELAY_CHUNK];
                match stream.try_read(&mut buf) {
                    Ok(0) => {
                        debug!("proxy {id}: remote closed the connection");
                        self.alive = false;
                        Some(Response::Close {
                            id,
                            code: CloseCode::PeerClosed,
                        })
                    }
                    Ok(n) => Some(Response::RecvTcp {
                        id,
                        data: buf[..n].to_vec(),
                    }),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => None,
                    Err(e) => {
                        warn!("proxy {id}: TCP read failed: {e}");
                        self.alive = false;
                        Some(Response::Close {
                            id,
                            code: CloseCode::PeerClosed,
                        })
                    }
                }
            }
            ProxyKind::Udp(socket) => {
                let mut buf = [0u8; UDP_DATAGRAM_MAX];
                match socket.try_recv_from(&mut buf) {
                    Ok((n, SocketAddr::V4(peer))) => Some(Response::RecvData {
                        id,
                        addr: *peer.ip(),
                        port: peer.port(),
                        data: buf[..n].to_vec(),
                    }),
                    Ok((_, peer)) => {
                        debug!("proxy {id}: ignoring datagram from non-IPv4 peer {peer}");
                        None
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => None,
                    Err(e) => {
                        // UDP proxies die without a RESP_CLOSE.
                        warn!("proxy {id}: UDP receive failed: {e}");
                        self.alive = false;
                        None
                    }
                }
            }
        }
    }
}

/// The proxy sessions owned by one control session, in creation order.
#[derive(Debug, Default)]
pub struct ProxySet {
    proxies: Vec<ProxySession>,
}

impl ProxySet {
    pub fn insert(&mut self, proxy: ProxySession) {
        self.proxies.push(proxy);
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ProxySession> {
        self.proxies.get_mut(index)
    }

    /// Returns `true` if a live proxy already uses `id`.
    pub fn has_live(&self, id: ProxyId) -> bool {
        self.proxies.iter().any(|p| p.alive && p.id == id)
    }

    /// Returns the first live proxy with `id`.
    pub fn find_live_mut(&mut self, id: ProxyId) -> Option<&mut ProxySession> {
        self.proxies.iter_mut().find(|p| p.alive && p.id == id)
    }

    /// Flags every proxy dead and returns how many were live.
    pub fn mark_all_dead(&mut self) -> usize {
        let mut count = 0;
        for proxy in self.proxies.iter_mut().filter(|p| p.alive) {
            proxy.alive = false;
            count += 1;
        }
        count
    }

    /// Drops (and thereby closes) every dead proxy.  Returns how many were removed.
    pub fn retain_live(&mut self) -> usize {
        let before = self.proxies.len();
        self.proxies.retain(|p| {
            if !p.alive {
                debug!("closing proxy {}", p.id);
            }
            p.alive
        });
        before - self.proxies.len()
    }

    /// Drops every proxy regardless of liveness.
    pub fn clear(&mut self) {
        self.proxies.clear();
    }
}

// ── Client sessions ───────────────────────────────────────────────────────────

/// What one non-blocking read of the control socket produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing to read right now.
    WouldBlock,
    /// EOF, a read error, or the session was already dead.
    Closed,
    /// Bytes were consumed; the assembler reports what they completed.
    Event(AssemblyEvent),
}

/// One control connection and everything it owns.
#[derive(Debug)]
pub struct ClientSession {
    id: Uuid,
    peer: SocketAddr,
    // Declared before `stream` so proxies are dropped first.
    proxies: ProxySet,
    stream: TcpStream,
    assembler: FrameAssembler,
    alive: bool,
}

impl ClientSession {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            proxies: ProxySet::default(),
            stream,
            assembler: FrameAssembler::new(),
            alive: true,
        }
    }

    /// Log correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Flags the session for teardown in the next cleanup pass.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    pub fn proxies(&self) -> &ProxySet {
        &self.proxies
    }

    pub fn proxies_mut(&mut self) -> &mut ProxySet {
        &mut self.proxies
    }

    /// Performs one non-blocking read sized by the assembler's current phase.
    pub fn read_event(&mut self) -> ReadOutcome {
        if !self.alive {
            return ReadOutcome::Closed;
        }

        let window = self.assembler.read_window();
        match self.stream.try_read(window) {
            Ok(0) => {
                debug!("session {}: control client closed the connection", self.id);
                self.alive = false;
                ReadOutcome::Closed
            }
            Ok(n) => ReadOutcome::Event(self.assembler.advance(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => {
                warn!("session {}: control read failed: {e}", self.id);
                self.alive = false;
                ReadOutcome::Closed
            }
        }
    }

    /// Encodes `response` and writes all of it to the control socket.
    ///
    /// A write error, or a write still incomplete after `write_timeout`,
    /// marks the session dead.  Dead sessions are never written to.
    pub async fn send(&mut self, response: &Response, write_timeout: Duration) {
        if !self.alive {
            return;
        }

        let bytes = match encode_response(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("session {}: failed to encode {:?}: {e}", self.id, response.response_type());
                return;
            }
        };

        match timeout(write_timeout, self.stream.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("session {}: control write failed: {e}", self.id);
                self.alive = false;
            }
            Err(_) => {
                warn!(
                    "session {}: control write did not finish within {write_timeout:?}",
                    self.id
                );
                self.alive = false;
            }
        }
    }

    /// Closes every proxy ahead of the control socket itself.
    pub fn close(&mut self) {
        self.alive = false;
        self.proxies.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
