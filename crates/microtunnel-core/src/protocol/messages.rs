//! All microtunnel protocol message types.
//!
//! Requests flow from the control client to the broker, responses flow back.
//! Both directions start every frame with a big-endian `u16` total length that
//! counts the length field itself.  Requests carry a `u16` type code, responses
//! a `u8` type code.

use std::net::Ipv4Addr;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the length prefix that starts every frame.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Request header: length (2) + request type (2).
pub const REQUEST_HEADER_SIZE: usize = 4;

/// Response header: length (2) + response type (1).
pub const RESPONSE_HEADER_SIZE: usize = 3;

/// Capacity of the per-session receive buffer.  No request frame may exceed it.
pub const CONTROL_BUFFER_CAPACITY: usize = 2048;

/// Largest chunk relayed from a TCP proxy in one `RESP_RECV_TCP` frame.
pub const TCP_RELAY_CHUNK: usize = 256;

/// Largest datagram relayed from a UDP proxy in one `RECV_DATA` frame.
pub const UDP_DATAGRAM_MAX: usize = 1024;

/// Longest hostname accepted by `QUERY_DNS`.
pub const MAX_DNS_NAME_LEN: usize = 253;

/// Correlation id chosen by the control client for each proxy.
///
/// Ids are opaque to the broker and only meaningful within one control session.
pub type ProxyId = u16;

// ── Request type codes ────────────────────────────────────────────────────────

/// Request type codes, as carried in bytes 2..4 of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestType {
    Ping = 0x0000,
    Reset = 0x0001,
    OpenTcp = 0x0002,
    SendTcp = 0x0003,
    QueryDns = 0x0004,
    BindUdp = 0x0005,
    SendUdp = 0x0006,
}

impl TryFrom<u16> for RequestType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0x0000 => Ok(RequestType::Ping),
            0x0001 => Ok(RequestType::Reset),
            0x0002 => Ok(RequestType::OpenTcp),
            0x0003 => Ok(RequestType::SendTcp),
            0x0004 => Ok(RequestType::QueryDns),
            0x0005 => Ok(RequestType::BindUdp),
            0x0006 => Ok(RequestType::SendUdp),
            _ => Err(()),
        }
    }
}

impl RequestType {
    /// Smallest legal total frame length for this request type.
    pub fn min_frame_len(self) -> usize {
        REQUEST_HEADER_SIZE
            + match self {
                RequestType::Ping | RequestType::Reset => 0,
                // id (2) + addr (4) + port (2)
                RequestType::OpenTcp | RequestType::SendUdp => 8,
                // id (2)
                RequestType::SendTcp => 2,
                // at least one name byte
                RequestType::QueryDns => 1,
                // id (2) + bind port (2)
                RequestType::BindUdp => 4,
            }
    }

    /// Fixed-size requests must match [`min_frame_len`](Self::min_frame_len) exactly.
    pub fn is_fixed_size(self) -> bool {
        matches!(
            self,
            RequestType::Ping | RequestType::Reset | RequestType::OpenTcp | RequestType::BindUdp
        )
    }
}

// ── Response type codes ───────────────────────────────────────────────────────

/// Response type codes, as carried in byte 2 of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseType {
    OpenTcp = 0x01,
    Close = 0x02,
    SendTcp = 0x03,
    RecvTcp = 0x04,
    QueryDns = 0x05,
    BindUdp = 0x06,
    RecvData = 0x07,
}

impl TryFrom<u8> for ResponseType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ResponseType::OpenTcp),
            0x02 => Ok(ResponseType::Close),
            0x03 => Ok(ResponseType::SendTcp),
            0x04 => Ok(ResponseType::RecvTcp),
            0x05 => Ok(ResponseType::QueryDns),
            0x06 => Ok(ResponseType::BindUdp),
            0x07 => Ok(ResponseType::RecvData),
            _ => Err(()),
        }
    }
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Outcome byte carried by `RESP_OPEN_TCP`, `RESP_BIND_UDP` and `RESP_QUERY_DNS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Failed = 0x01,
}

impl TryFrom<u8> for Status {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Status::Ok),
            0x01 => Ok(Status::Failed),
            _ => Err(()),
        }
    }
}

/// Reason byte carried by `RESP_CLOSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseCode {
    /// The remote end closed the connection, or I/O on it failed.
    PeerClosed = 0x00,
    /// The request named an id with no live proxy of the required kind.
    UnknownId = 0x01,
}

impl TryFrom<u8> for CloseCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(CloseCode::PeerClosed),
            0x01 => Ok(CloseCode::UnknownId),
            _ => Err(()),
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A decoded request from the control client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Keepalive; never answered.
    Ping,
    /// Tear down every proxy owned by the session.
    Reset,
    /// Connect outbound to `addr:port` and register the stream under `id`.
    OpenTcp {
        id: ProxyId,
        addr: Ipv4Addr,
        port: u16,
    },
    /// Write `data` verbatim to the TCP proxy `id`.
    SendTcp { id: ProxyId, data: Vec<u8> },
    /// Send `data` as one datagram from the UDP proxy `id` to `addr:port`.
    SendUdp {
        id: ProxyId,
        addr: Ipv4Addr,
        port: u16,
        data: Vec<u8>,
    },
    /// Bind a UDP socket on all interfaces at `bind_port` and register it under `id`.
    BindUdp { id: ProxyId, bind_port: u16 },
    /// Resolve `name` to its first IPv4 address.
    QueryDns { name: String },
}

impl Request {
    /// Returns the wire type code for this request.
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Ping => RequestType::Ping,
            Request::Reset => RequestType::Reset,
            Request::OpenTcp { .. } => RequestType::OpenTcp,
            Request::SendTcp { .. } => RequestType::SendTcp,
            Request::SendUdp { .. } => RequestType::SendUdp,
            Request::BindUdp { .. } => RequestType::BindUdp,
            Request::QueryDns { .. } => RequestType::QueryDns,
        }
    }

    /// Returns the proxy id this request refers to, if any.
    pub fn proxy_id(&self) -> Option<ProxyId> {
        match self {
            Request::OpenTcp { id, .. }
            | Request::SendTcp { id, .. }
            | Request::SendUdp { id, .. }
            | Request::BindUdp { id, .. } => Some(*id),
            Request::Ping | Request::Reset | Request::QueryDns { .. } => None,
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A response from the broker to the control client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Result of an `OPEN_TCP` request.
    OpenTcp { id: ProxyId, status: Status },
    /// The proxy `id` is gone (or never existed).
    Close { id: ProxyId, code: CloseCode },
    /// Acknowledges a `SEND_TCP` whose payload was fully written.
    SendTcp { id: ProxyId },
    /// Data read from TCP proxy `id`.
    RecvTcp { id: ProxyId, data: Vec<u8> },
    /// A datagram received by UDP proxy `id` from `addr:port`.
    RecvData {
        id: ProxyId,
        addr: Ipv4Addr,
        port: u16,
        data: Vec<u8>,
    },
    /// Result of a `QUERY_DNS` request.  `addr` is unspecified and `name`
    /// empty when `status` is [`Status::Failed`].
    QueryDns {
        status: Status,
        addr: Ipv4Addr,
        name: String,
    },
    /// Result of a `BIND_UDP` request.
    BindUdp { id: ProxyId, status: Status },
}

impl Response {
    /// Returns the wire type code for this response.
    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::OpenTcp { .. } => ResponseType::OpenTcp,
            Response::Close { .. } => ResponseType::Close,
            Response::SendTcp { .. } => ResponseType::SendTcp,
            Response::RecvTcp { .. } => ResponseType::RecvTcp,
            Response::RecvData { .. } => ResponseType::RecvData,
            Response::QueryDns { .. } => ResponseType::QueryDns,
            Response::BindUdp { .. } => ResponseType::BindUdp,
        }
    }

    /// Builds the failure form of `RESP_QUERY_DNS`.
    pub fn dns_not_found() -> Self {
        Response::QueryDns {
            status: Status::Failed,
            addr: Ipv4Addr::UNSPECIFIED,
            name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_try_from_round_trips_every_code() {
        for ty in [
            RequestType::Ping,
            RequestType::Reset,
            RequestType::OpenTcp,
            RequestType::SendTcp,
            RequestType::QueryDns,
            RequestType::BindUdp,
            RequestType::SendUdp,
        ] {
            assert_eq!(RequestType::try_from(ty as u16), Ok(ty));
        }
        assert!(RequestType::try_from(0x00FF).is_err());
    }

    #[test]
    fn test_response_type_rejects_unknown_code() {
        assert!(ResponseType::try_from(0x00).is_err());
        assert!(ResponseType::try_from(0x08).is_err());
    }

    #[test]
    fn test_fixed_size_requests_have_expected_lengths() {
        assert_eq!(RequestType::Ping.min_frame_len(), 4);
        assert_eq!(RequestType::OpenTcp.min_frame_len(), 12);
        assert_eq!(RequestType::BindUdp.min_frame_len(), 8);
        assert!(RequestType::OpenTcp.is_fixed_size());
        assert!(!RequestType::SendTcp.is_fixed_size());
    }

    #[test]
    fn test_proxy_id_is_exposed_for_proxy_requests_only() {
        assert_eq!(Request::BindUdp { id: 3, bind_port: 9000 }.proxy_id(), Some(3));
        assert_eq!(Request::Ping.proxy_id(), None);
        assert_eq!(
            Request::QueryDns {
                name: "localhost".to_string()
            }
            .proxy_id(),
            None
        );
    }

    #[test]
    fn test_dns_not_found_has_empty_name_and_unspecified_addr() {
        match Response::dns_not_found() {
            Response::QueryDns { status, addr, name } => {
                assert_eq!(status, Status::Failed);
                assert_eq!(addr, Ipv4Addr::UNSPECIFIED);
                assert!(name.is_empty());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
