//! Infrastructure layer: sockets, the reactor loop and hostname resolution.
//!
//! # Responsibilities
//!
//! - Binding the control listener and accepting control clients
//! - Reading control bytes into each session's frame assembler
//! - Relaying inbound proxy data back over the control channel
//! - Resolving hostnames for `QUERY_DNS`
//! - Tearing down dead sessions once per tick

pub mod reactor;
pub mod resolver;
pub mod session;

pub use reactor::{BrokerError, Reactor};
pub use resolver::{HostResolver, ResolveError, SystemResolver};
pub use session::{ClientSession, ProxyKind, ProxySession, ProxySet, ReadOutcome};
