//! microtunnel-broker library crate.
//!
//! A remote control client holds one TCP connection to the broker and, over
//! it, asks the broker to open outbound TCP connections, bind UDP sockets and
//! resolve hostnames.  Results and inbound data come back over the same
//! connection as framed binary responses.
//!
//! # Architecture
//!
//! ```text
//! control client  (length-prefixed binary frames over TCP)
//!         ↕
//! [microtunnel-broker]
//!   ├── domain/           BrokerConfig
//!   ├── application/      Dispatcher: request → network operation → response
//!   └── infrastructure/
//!         ├── reactor/    single-threaded accept/read/relay/cleanup loop
//!         ├── session/    ClientSession, ProxySession, ProxySet
//!         └── resolver/   HostResolver trait + system implementation
//!         ↕
//! outbound TCP peers, UDP peers, system DNS
//! ```
//!
//! Only one control client is served at a time: accepting a new connection
//! evicts the previous one.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: request dispatch.
pub mod application;

/// Infrastructure layer: reactor, sessions and resolver.
pub mod infrastructure;
