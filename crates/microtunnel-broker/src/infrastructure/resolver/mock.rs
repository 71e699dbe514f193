//! In-memory resolver for tests.
//!
//! `StaticResolver` answers from a fixed table and records every name it was
//! asked for, so tests can assert both the DNS response and the lookup that
//! produced it.
//!
//! ```ignore
//! let resolver = Arc::new(StaticResolver::new().with_host("localhost", Ipv4Addr::LOCALHOST));
//! let dispatcher = Dispatcher::new(resolver.clone(), timeout, timeout);
//! // ... dispatch a QUERY_DNS ...
//! assert_eq!(resolver.queries(), vec!["localhost".to_string()]);
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{HostResolver, ResolveError};

/// A resolver that answers from a fixed name → address table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Ipv4Addr>,
    queries: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table entry.
    pub fn with_host(mut self, name: &str, addr: Ipv4Addr) -> Self {
        self.hosts.insert(name.to_string(), addr);
        self
    }

    /// Returns every name passed to `resolve_ipv4`, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve_ipv4(&self, name: &str) -> Result<Ipv4Addr, ResolveError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(name.to_string());
        }
        self.hosts
            .get(name)
            .copied()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }
}
