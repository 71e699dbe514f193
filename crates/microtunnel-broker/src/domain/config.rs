//! Broker configuration.
//!
//! [`BrokerConfig`] holds every runtime setting.  `main.rs` fills it from the
//! command line (with environment fallbacks); tests build it directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default control port.
pub const DEFAULT_PORT: u16 = 8100;

/// All runtime configuration for the broker.
///
/// # Example
///
/// ```rust
/// use microtunnel_broker::domain::BrokerConfig;
///
/// let cfg = BrokerConfig::default();
/// assert_eq!(cfg.listen_addr.port(), 8100);
/// ```
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the control listener binds to.
    pub listen_addr: SocketAddr,

    /// How long the reactor sleeps after a tick that made no progress.
    pub poll_interval: Duration,

    /// Upper bound on an outbound `OPEN_TCP` connect.
    pub connect_timeout: Duration,

    /// Upper bound on writing one frame, to the control socket or to a TCP
    /// proxy.  A control write that exceeds it kills the session.
    pub write_timeout: Duration,
}

impl Default for BrokerConfig {
    /// | Field           | Default        |
    /// |-----------------|----------------|
    /// | listen_addr     | `0.0.0.0:8100` |
    /// | poll_interval   | 2 ms           |
    /// | connect_timeout | 10 seconds     |
    /// | write_timeout   | 5 seconds      |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            poll_interval: Duration::from_millis(2),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
