//! Binary codec for microtunnel request and response frames.
//!
//! Wire format:
//! ```text
//! request:  [total_len:2][request_type:2][payload:N]
//! response: [total_len:2][response_type:1][payload:N]
//! ```
//! `total_len` counts the whole frame including itself.  All multi-byte
//! integers are big-endian; IPv4 addresses travel as a `u32` in network order.

use std::net::Ipv4Addr;

use crate::protocol::messages::{
    CloseCode, Request, RequestType, Response, ResponseType, Status, CONTROL_BUFFER_CAPACITY,
    LENGTH_PREFIX_SIZE, MAX_DNS_NAME_LEN, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
use thiserror::Error;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The length prefix disagrees with the number of bytes in the frame.
    #[error("frame length mismatch: header says {declared}, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The request type field is not a recognized value.
    #[error("unknown request type: 0x{0:04X}")]
    UnknownRequestType(u16),

    /// The response type byte is not a recognized value.
    #[error("unknown response type: 0x{0:02X}")]
    UnknownResponseType(u8),

    /// The frame length is illegal for its request type.
    #[error("invalid length {len} for {request_type:?} (expected {expected})")]
    InvalidLength {
        request_type: RequestType,
        len: usize,
        expected: String,
    },

    /// The encoded frame would not fit its length field or the receive buffer.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The payload could not be parsed (bad status byte, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Request`] into one complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the frame would not fit the
/// broker's 2048-byte receive buffer, and [`ProtocolError::MalformedPayload`]
/// for a `QUERY_DNS` name that is empty or longer than 253 bytes.
///
/// # Examples
///
/// ```rust
/// use microtunnel_core::{decode_request, encode_request, Request};
///
/// let req = Request::SendTcp { id: 7, data: b"hello".to_vec() };
/// let bytes = encode_request(&req).unwrap();
/// assert_eq!(bytes.len(), 4 + 2 + 5);
/// assert_eq!(decode_request(&bytes).unwrap(), req);
/// ```
pub fn encode_request(req: &Request) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + 8);
    buf.extend_from_slice(&[0x00, 0x00]); // length, patched below
    buf.extend_from_slice(&(req.request_type() as u16).to_be_bytes());

    match req {
        Request::Ping | Request::Reset => {}
        Request::OpenTcp { id, addr, port } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&addr.octets());
            buf.extend_from_slice(&port.to_be_bytes());
        }
        Request::SendTcp { id, data } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(data);
        }
        Request::SendUdp {
            id,
            addr,
            port,
            data,
        } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&addr.octets());
            buf.extend_from_slice(&port.to_be_bytes());
            buf.extend_from_slice(data);
        }
        Request::BindUdp { id, bind_port } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&bind_port.to_be_bytes());
        }
        Request::QueryDns { name } => {
            validate_dns_name(name.as_bytes())?;
            buf.extend_from_slice(name.as_bytes());
        }
    }

    finish_frame(buf, CONTROL_BUFFER_CAPACITY)
}

/// Decodes one complete request frame.
///
/// `frame` must hold exactly one frame, as produced by the
/// [`FrameAssembler`](crate::protocol::assembler::FrameAssembler).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the declared length disagrees with the
/// frame, the type is unknown, the length breaks the type's size rule, or a
/// field is malformed.
pub fn decode_request(frame: &[u8]) -> Result<Request, ProtocolError> {
    let declared = read_u16(frame, 0)? as usize;
    if declared != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    let type_code = read_u16(frame, LENGTH_PREFIX_SIZE)?;
    let request_type =
        RequestType::try_from(type_code).map_err(|_| ProtocolError::UnknownRequestType(type_code))?;
    check_request_len(request_type, frame.len())?;

    let p = &frame[REQUEST_HEADER_SIZE..];
    let req = match request_type {
        RequestType::Ping => Request::Ping,
        RequestType::Reset => Request::Reset,
        RequestType::OpenTcp => Request::OpenTcp {
            id: read_u16(p, 0)?,
            addr: read_ipv4(p, 2)?,
            port: read_u16(p, 6)?,
        },
        RequestType::SendTcp => Request::SendTcp {
            id: read_u16(p, 0)?,
            data: p[2..].to_vec(),
        },
        RequestType::SendUdp => Request::SendUdp {
            id: read_u16(p, 0)?,
            addr: read_ipv4(p, 2)?,
            port: read_u16(p, 6)?,
            data: p[8..].to_vec(),
        },
        RequestType::BindUdp => Request::BindUdp {
            id: read_u16(p, 0)?,
            bind_port: read_u16(p, 2)?,
        },
        RequestType::QueryDns => Request::QueryDns {
            name: decode_dns_name(p)?,
        },
    };
    Ok(req)
}

/// Encodes a [`Response`] into one complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the frame length does not fit
/// in the 16-bit length field.
///
/// # Examples
///
/// ```rust
/// use microtunnel_core::{encode_response, Response};
///
/// let bytes = encode_response(&Response::SendTcp { id: 7 }).unwrap();
/// assert_eq!(bytes, vec![0x00, 0x05, 0x03, 0x00, 0x07]);
/// ```
pub fn encode_response(resp: &Response) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(RESPONSE_HEADER_SIZE + 8);
    buf.extend_from_slice(&[0x00, 0x00]); // length, patched below
    buf.push(resp.response_type() as u8);

    match resp {
        Response::OpenTcp { id, status } | Response::BindUdp { id, status } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.push(*status as u8);
        }
        Response::Close { id, code } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.push(*code as u8);
        }
        Response::SendTcp { id } => buf.extend_from_slice(&id.to_be_bytes()),
        Response::RecvTcp { id, data } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(data);
        }
        Response::RecvData {
            id,
            addr,
            port,
            data,
        } => {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&addr.octets());
            buf.extend_from_slice(&port.to_be_bytes());
            buf.extend_from_slice(data);
        }
        Response::QueryDns { status, addr, name } => {
            buf.push(*status as u8);
            buf.extend_from_slice(&addr.octets());
            // The name is only echoed on success.
            if *status == Status::Ok {
                buf.extend_from_slice(name.as_bytes());
            }
        }
    }

    finish_frame(buf, u16::MAX as usize)
}

/// Decodes one [`Response`] from the beginning of `bytes`.
///
/// Returns the response and the number of bytes consumed, so a reader can
/// advance past it.  Used by control clients and by the broker's tests.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if `bytes` does not yet hold
/// the whole frame, or another [`ProtocolError`] if the frame is malformed.
pub fn decode_response(bytes: &[u8]) -> Result<(Response, usize), ProtocolError> {
    let declared = read_u16(bytes, 0)? as usize;
    if declared < RESPONSE_HEADER_SIZE {
        return Err(ProtocolError::MalformedPayload(format!(
            "response length {declared} is shorter than the header"
        )));
    }
    if bytes.len() < declared {
        return Err(ProtocolError::InsufficientData {
            needed: declared,
            available: bytes.len(),
        });
    }

    let type_byte = bytes[LENGTH_PREFIX_SIZE];
    let response_type =
        ResponseType::try_from(type_byte).map_err(|_| ProtocolError::UnknownResponseType(type_byte))?;
    let p = &bytes[RESPONSE_HEADER_SIZE..declared];

    let resp = match response_type {
        ResponseType::OpenTcp => {
            require_len(p, 3, "RESP_OPEN_TCP")?;
            Response::OpenTcp {
                id: read_u16(p, 0)?,
                status: read_status(p[2])?,
            }
        }
        ResponseType::BindUdp => {
            require_len(p, 3, "RESP_BIND_UDP")?;
            Response::BindUdp {
                id: read_u16(p, 0)?,
                status: read_status(p[2])?,
            }
        }
        ResponseType::Close => {
            require_len(p, 3, "RESP_CLOSE")?;
            let code = CloseCode::try_from(p[2])
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown close code: {}", p[2])))?;
            Response::Close {
                id: read_u16(p, 0)?,
                code,
            }
        }
        ResponseType::SendTcp => Response::SendTcp { id: read_u16(p, 0)? },
        ResponseType::RecvTcp => Response::RecvTcp {
            id: read_u16(p, 0)?,
            data: p[2..].to_vec(),
        },
        ResponseType::RecvData => {
            require_len(p, 8, "RECV_DATA")?;
            Response::RecvData {
                id: read_u16(p, 0)?,
                addr: read_ipv4(p, 2)?,
                port: read_u16(p, 6)?,
                data: p[8..].to_vec(),
            }
        }
        ResponseType::QueryDns => {
            require_len(p, 5, "RESP_QUERY_DNS")?;
            let name = std::str::from_utf8(&p[5..])
                .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
                .to_string();
            Response::QueryDns {
                status: read_status(p[0])?,
                addr: read_ipv4(p, 1)?,
                name,
            }
        }
    };
    Ok((resp, declared))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Patches the length prefix of a fully built frame.
fn finish_frame(mut buf: Vec<u8>, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let len = buf.len();
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(len as u16).to_be_bytes());
    Ok(buf)
}

fn check_request_len(request_type: RequestType, len: usize) -> Result<(), ProtocolError> {
    let min = request_type.min_frame_len();
    if request_type.is_fixed_size() {
        if len != min {
            return Err(ProtocolError::InvalidLength {
                request_type,
                len,
                expected: format!("exactly {min}"),
            });
        }
    } else if len < min {
        return Err(ProtocolError::InvalidLength {
            request_type,
            len,
            expected: format!("at least {min}"),
        });
    }
    Ok(())
}

/// Names may arrive NUL-terminated; everything from the first NUL on is ignored.
fn decode_dns_name(p: &[u8]) -> Result<String, ProtocolError> {
    let raw = match p.iter().position(|&b| b == 0) {
        Some(end) => &p[..end],
        None => p,
    };
    validate_dns_name(raw)?;
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8 in hostname: {e}")))
}

fn validate_dns_name(raw: &[u8]) -> Result<(), ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::MalformedPayload("empty hostname".to_string()));
    }
    if raw.len() > MAX_DNS_NAME_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "hostname of {} bytes exceeds {MAX_DNS_NAME_LEN}",
            raw.len()
        )));
    }
    Ok(())
}

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

fn read_ipv4(buf: &[u8], offset: usize) -> Result<Ipv4Addr, ProtocolError> {
    if buf.len() < offset + 4 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(Ipv4Addr::new(
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ))
}

fn read_status(byte: u8) -> Result<Status, ProtocolError> {
    Status::try_from(byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown status code: {byte}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
