//! # microtunnel-core
//!
//! Shared protocol library for the microtunnel broker: message types, the
//! binary codec, and the incremental frame assembler used on the control
//! channel.
//!
//! This crate performs no I/O.  It knows how bytes are laid out on the wire
//! and how to rebuild frames from arbitrarily chunked reads; the broker crate
//! owns the sockets.
//!
//! # Architecture overview
//!
//! A control client holds one TCP connection to the broker and asks it to
//! open outbound TCP connections, bind UDP sockets and resolve hostnames.
//! Every request and every response travels as one length-prefixed frame:
//!
//! - **`protocol::messages`** – Typed [`Request`] and [`Response`] values plus
//!   the wire constants (type codes, header sizes, buffer limits).
//!
//! - **`protocol::codec`** – Field-by-field big-endian encoding and decoding
//!   of those values, with bounds checks before every access.
//!
//! - **`protocol::assembler`** – The per-connection state machine that reads
//!   exactly as many bytes as the current frame still needs.

pub mod protocol;

pub use protocol::assembler::{AssemblerPhase, AssemblyEvent, FrameAssembler};
pub use protocol::codec::{
    decode_request, decode_response, encode_request, encode_response, ProtocolError,
};
pub use protocol::messages::{CloseCode, ProxyId, Request, Response, Status};
