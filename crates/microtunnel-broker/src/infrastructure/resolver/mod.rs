//! Hostname resolution for `QUERY_DNS`.
//!
//! # Testability
//!
//! The dispatcher only sees the [`HostResolver`] trait.  Production uses
//! [`SystemResolver`]; tests inject [`mock::StaticResolver`] so DNS answers
//! are deterministic.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;

/// Error type for hostname resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup succeeded but produced no IPv4 address.
    #[error("no IPv4 address found for {0}")]
    NotFound(String),
    /// The system resolver reported an error.
    #[error("lookup of {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves a hostname to a single IPv4 address.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns the first IPv4 address `name` resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the name does not resolve or has no IPv4
    /// address.
    async fn resolve_ipv4(&self, name: &str) -> Result<Ipv4Addr, ResolveError>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve_ipv4(&self, name: &str) -> Result<Ipv4Addr, ResolveError> {
        let addrs = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                name: name.to_string(),
                source,
            })?;

        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }
}
