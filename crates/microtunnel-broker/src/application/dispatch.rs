//! Request dispatch: one assembled frame in, at most one response out.
//!
//! | Request     | Success                    | Failure                                 |
//! |-------------|----------------------------|-----------------------------------------|
//! | `PING`      | nothing                    | -                                       |
//! | `RESET`     | nothing; all proxies dead  | -                                       |
//! | `OPEN_TCP`  | `RESP_OPEN_TCP{id, 0}`     | `RESP_OPEN_TCP{id, 1}`                  |
//! | `SEND_TCP`  | `RESP_SEND_TCP{id}`        | `RESP_CLOSE{id, 0}` / `RESP_CLOSE{id, 1}` |
//! | `SEND_UDP`  | nothing                    | nothing (logged) / `RESP_CLOSE{id, 1}`  |
//! | `BIND_UDP`  | `RESP_BIND_UDP{id, 0}`     | `RESP_BIND_UDP{id, 1}`                  |
//! | `QUERY_DNS` | `RESP_QUERY_DNS{0, a, n}`  | `RESP_QUERY_DNS{1, 0.0.0.0}`            |
//!
//! Frames that fail to decode are logged and dropped without a response.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use microtunnel_core::{decode_request, CloseCode, ProxyId, Request, Response, Status};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::infrastructure::resolver::HostResolver;
use crate::infrastructure::session::{ProxyKind, ProxySession, ProxySet};

/// Interprets request frames against one session's proxy set.
pub struct Dispatcher {
    resolver: Arc<dyn HostResolver>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn HostResolver>,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            connect_timeout,
            write_timeout,
        }
    }

    /// Decodes `frame` and executes it.
    ///
    /// Returns the response to send back, if the request calls for one.
    pub async fn dispatch(&self, proxies: &mut ProxySet, frame: &[u8]) -> Option<Response> {
        match decode_request(frame) {
            Ok(request) => self.handle(proxies, request).await,
            Err(e) => {
                warn!("dropping malformed request frame ({} bytes): {e}", frame.len());
                None
            }
        }
    }

    /// Executes an already-decoded request.
    pub async fn handle(&self, proxies: &mut ProxySet, request: Request) -> Option<Response> {
        match request.proxy_id() {
            Some(id) => debug!("dispatching {:?} for proxy {id}", request.request_type()),
            None => debug!("dispatching {:?}", request.request_type()),
        }
        match request {
            Request::Ping => None,
            Request::Reset => {
                let count = proxies.mark_all_dead();
                info!("RESET: closing {count} proxy session(s)");
                None
            }
            Request::OpenTcp { id, addr, port } => Some(self.open_tcp(proxies, id, addr, port).await),
            Request::SendTcp { id, data } => Some(self.send_tcp(proxies, id, &data).await),
            Request::SendUdp {
                id,
                addr,
                port,
                data,
            } => self.send_udp(proxies, id, addr, port, &data).await,
            Request::BindUdp { id, bind_port } => Some(self.bind_udp(proxies, id, bind_port).await),
            Request::QueryDns { name } => Some(self.query_dns(name).await),
        }
    }

    // ── TCP ──────────────────────────────────────────────────────────────────

    async fn open_tcp(
        &self,
        proxies: &mut ProxySet,
        id: ProxyId,
        addr: Ipv4Addr,
        port: u16,
    ) -> Response {
        let target = SocketAddrV4::new(addr, port);
        if proxies.has_live(id) {
            warn!("OPEN_TCP {id} -> {target}: id already in use");
            return Response::OpenTcp {
                id,
                status: Status::Failed,
            };
        }

        let status = match timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                info!("proxy {id}: connected to {target}");
                proxies.insert(ProxySession::tcp(id, stream));
                Status::Ok
            }
            Ok(Err(e)) => {
                warn!("OPEN_TCP {id} -> {target} failed: {e}");
                Status::Failed
            }
            Err(_) => {
                warn!(
                    "OPEN_TCP {id} -> {target} timed out after {:?}",
                    self.connect_timeout
                );
                Status::Failed
            }
        };
        Response::OpenTcp { id, status }
    }

    async fn send_tcp(&self, proxies: &mut ProxySet, id: ProxyId, data: &[u8]) -> Response {
        let Some(proxy) = proxies.find_live_mut(id) else {
            debug!("SEND_TCP for unknown proxy {id}");
            return unknown_id(id);
        };
        let ProxyKind::Tcp(stream) = proxy.kind_mut() else {
            debug!("SEND_TCP for UDP proxy {id}");
            return unknown_id(id);
        };

        let failure = match timeout(self.write_timeout, stream.write_all(data)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("write did not finish within {:?}", self.write_timeout)),
        };

        match failure {
            None => Response::SendTcp { id },
            Some(reason) => {
                warn!("proxy {id}: write failed: {reason}");
                proxy.mark_dead();
                Response::Close {
                    id,
                    code: CloseCode::PeerClosed,
                }
            }
        }
    }

    // ── UDP ──────────────────────────────────────────────────────────────────

    async fn bind_udp(&self, proxies: &mut ProxySet, id: ProxyId, bind_port: u16) -> Response {
        if proxies.has_live(id) {
            warn!("BIND_UDP {id}: id already in use");
            return Response::BindUdp {
                id,
                status: Status::Failed,
            };
        }

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, bind_port);
        let status = match UdpSocket::bind(local).await {
            Ok(socket) => {
                match socket.local_addr() {
                    Ok(bound) => info!("proxy {id}: UDP bound on {bound}"),
                    Err(_) => info!("proxy {id}: UDP bound on {local}"),
                }
                proxies.insert(ProxySession::udp(id, socket));
                Status::Ok
            }
            Err(e) => {
                warn!("BIND_UDP {id} on {local} failed: {e}");
                Status::Failed
            }
        };
        Response::BindUdp { id, status }
    }

    async fn send_udp(
        &self,
        proxies: &mut ProxySet,
        id: ProxyId,
        addr: Ipv4Addr,
        port: u16,
        data: &[u8],
    ) -> Option<Response> {
        let Some(proxy) = proxies.find_live_mut(id) else {
            debug!("SEND_UDP for unknown proxy {id}");
            return Some(unknown_id(id));
        };
        let ProxyKind::Udp(socket) = proxy.kind_mut() else {
            debug!("SEND_UDP for TCP proxy {id}");
            return Some(unknown_id(id));
        };

        let target = SocketAddrV4::new(addr, port);
        match socket.send_to(data, target).await {
            Ok(sent) if sent == data.len() => debug!("proxy {id}: sent {sent} bytes to {target}"),
            Ok(sent) => warn!("proxy {id}: short datagram to {target} ({sent}/{})", data.len()),
            Err(e) => warn!("proxy {id}: send to {target} failed: {e}"),
        }
        None
    }

    // ── DNS ──────────────────────────────────────────────────────────────────

    async fn query_dns(&self, name: String) -> Response {
        match self.resolver.resolve_ipv4(&name).await {
            Ok(addr) => {
                debug!("QUERY_DNS {name} -> {addr}");
                Response::QueryDns {
                    status: Status::Ok,
                    addr,
                    name,
                }
            }
            Err(e) => {
                info!("QUERY_DNS failed: {e}");
                Response::dns_not_found()
            }
        }
    }
}

fn unknown_id(id: ProxyId) -> Response {
    Response::Close {
        id,
        code: CloseCode::UnknownId,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::resolver::mock::StaticResolver;
    use microtunnel_core::encode_request;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn make_dispatcher() -> (Dispatcher, Arc<StaticResolver>) {
        let resolver = Arc::new(StaticResolver::new().with_host("localhost", Ipv4Addr::LOCALHOST));
        let dispatcher = Dispatcher::new(
            resolver.clone(),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        (dispatcher, resolver)
    }

    /// Returns a port on loopback that nothing is listening on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_ping_and_reset_produce_no_response() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();

        assert_eq!(dispatcher.handle(&mut proxies, Request::Ping).await, None);
        assert_eq!(dispatcher.handle(&mut proxies, Request::Reset).await, None);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_silently() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();

        // OPEN_TCP truncated to six bytes.
        let resp = dispatcher
            .dispatch(&mut proxies, &[0x00, 0x06, 0x00, 0x02, 0x00, 0x07])
            .await;

        assert_eq!(resp, None);
        assert!(proxies.is_empty());
    }

    #[tokio::test]
    async fn test_open_tcp_to_closed_port_fails_without_proxy() {
        // Arrange
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();
        let port = closed_port().await;

        // Act
        let resp = dispatcher
            .handle(
                &mut proxies,
                Request::OpenTcp {
                    id: 7,
                    addr: Ipv4Addr::LOCALHOST,
                    port,
                },
            )
            .await;

        // Assert
        assert_eq!(
            resp,
            Some(Response::OpenTcp {
                id: 7,
                status: Status::Failed
            })
        );
        assert!(proxies.is_empty());
    }

    #[tokio::test]
    async fn test_open_tcp_then_send_tcp_writes_payload() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = target.local_addr().unwrap().port();

        let open = dispatcher
            .handle(
                &mut proxies,
                Request::OpenTcp {
                    id: 7,
                    addr: Ipv4Addr::LOCALHOST,
                    port,
                },
            )
            .await;
        let (mut remote, _) = target.accept().await.unwrap();
        let send = dispatcher
            .handle(
                &mut proxies,
                Request::SendTcp {
                    id: 7,
                    data: b"hello".to_vec(),
                },
            )
            .await;

        assert_eq!(
            open,
            Some(Response::OpenTcp {
                id: 7,
                status: Status::Ok
            })
        );
        assert_eq!(send, Some(Response::SendTcp { id: 7 }));
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_send_tcp_write_timeout_closes_proxy() {
        // Arrange: the remote end accepts but never reads
        let resolver = Arc::new(StaticResolver::new());
        let dispatcher =
            Dispatcher::new(resolver, Duration::from_secs(2), Duration::from_millis(50));
        let mut proxies = ProxySet::default();
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = target.local_addr().unwrap().port();
        dispatcher
            .handle(
                &mut proxies,
                Request::OpenTcp {
                    id: 7,
                    addr: Ipv4Addr::LOCALHOST,
                    port,
                },
            )
            .await;
        let (_remote, _) = target.accept().await.unwrap();

        // Act: far more than both socket buffers can hold
        let resp = dispatcher
            .handle(
                &mut proxies,
                Request::SendTcp {
                    id: 7,
                    data: vec![0; 32 * 1024 * 1024],
                },
            )
            .await;

        // Assert
        assert_eq!(
            resp,
            Some(Response::Close {
                id: 7,
                code: CloseCode::PeerClosed
            })
        );
        assert!(!proxies.has_live(7));
        assert_eq!(proxies.retain_live(), 1);
    }

    #[tokio::test]
    async fn test_send_tcp_to_unknown_id_reports_unknown() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();

        let resp = dispatcher
            .dispatch(
                &mut proxies,
                &encode_request(&Request::SendTcp {
                    id: 42,
                    data: vec![1],
                })
                .unwrap(),
            )
            .await;

        assert_eq!(
            resp,
            Some(Response::Close {
                id: 42,
                code: CloseCode::UnknownId
            })
        );
    }

    #[tokio::test]
    async fn test_bind_udp_rejects_duplicate_live_id() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();

        let first = dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 3, bind_port: 0 })
            .await;
        let second = dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 3, bind_port: 0 })
            .await;

        assert_eq!(
            first,
            Some(Response::BindUdp {
                id: 3,
                status: Status::Ok
            })
        );
        assert_eq!(
            second,
            Some(Response::BindUdp {
                id: 3,
                status: Status::Failed
            })
        );
        assert_eq!(proxies.len(), 1);
    }

    #[tokio::test]
    async fn test_send_tcp_to_udp_proxy_reports_unknown() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();
        dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 3, bind_port: 0 })
            .await;

        let resp = dispatcher
            .handle(
                &mut proxies,
                Request::SendTcp {
                    id: 3,
                    data: vec![0xFF],
                },
            )
            .await;

        assert_eq!(
            resp,
            Some(Response::Close {
                id: 3,
                code: CloseCode::UnknownId
            })
        );
        assert!(proxies.has_live(3), "the UDP proxy is left untouched");
    }

    #[tokio::test]
    async fn test_send_udp_success_is_silent_and_delivers_datagram() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 3, bind_port: 0 })
            .await;

        let resp = dispatcher
            .handle(
                &mut proxies,
                Request::SendUdp {
                    id: 3,
                    addr: Ipv4Addr::LOCALHOST,
                    port: peer_port,
                    data: b"ping".to_vec(),
                },
            )
            .await;

        assert_eq!(resp, None);
        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_send_udp_to_unknown_id_reports_unknown() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();

        let resp = dispatcher
            .handle(
                &mut proxies,
                Request::SendUdp {
                    id: 8,
                    addr: Ipv4Addr::LOCALHOST,
                    port: 9,
                    data: vec![],
                },
            )
            .await;

        assert_eq!(
            resp,
            Some(Response::Close {
                id: 8,
                code: CloseCode::UnknownId
            })
        );
    }

    #[tokio::test]
    async fn test_reset_kills_every_proxy() {
        let (dispatcher, _) = make_dispatcher();
        let mut proxies = ProxySet::default();
        dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 1, bind_port: 0 })
            .await;
        dispatcher
            .handle(&mut proxies, Request::BindUdp { id: 2, bind_port: 0 })
            .await;

        dispatcher.handle(&mut proxies, Request::Reset).await;

        assert!(!proxies.has_live(1));
        assert!(!proxies.has_live(2));
        assert_eq!(proxies.retain_live(), 2);
    }

    #[tokio::test]
    async fn test_query_dns_answers_from_resolver() {
        let (dispatcher, resolver) = make_dispatcher();
        let mut proxies = ProxySet::default();

        let hit = dispatcher
            .handle(
                &mut proxies,
                Request::QueryDns {
                    name: "localhost".to_string(),
                },
            )
            .await;
        let miss = dispatcher
            .handle(
                &mut proxies,
                Request::QueryDns {
                    name: "nowhere.test".to_string(),
                },
            )
            .await;

        assert_eq!(
            hit,
            Some(Response::QueryDns {
                status: Status::Ok,
                addr: Ipv4Addr::LOCALHOST,
                name: "localhost".to_string()
            })
        );
        assert_eq!(miss, Some(Response::dns_not_found()));
        assert_eq!(
            resolver.queries(),
            vec!["localhost".to_string(), "nowhere.test".to_string()]
        );
    }
}
