//! microtunnel broker: entry point.
//!
//! Listens for a single control client and carries out its TCP, UDP and DNS
//! requests.  See the library crate docs for the architecture.
//!
//! # Usage
//!
//! ```text
//! microtunnel-broker [OPTIONS]
//!
//! Options:
//!   --port                 <PORT>  Control listener port [default: 8100]
//!   --bind                 <IP>    Control listener address [default: 0.0.0.0]
//!   --poll-interval-ms     <MS>    Idle sleep between reactor ticks [default: 2]
//!   --connect-timeout-secs <SECS>  OPEN_TCP connect timeout [default: 10]
//!   --write-timeout-secs   <SECS>  Per-frame write timeout [default: 5]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                       | Default   |
//! |--------------------------------|-----------|
//! | `MICROTUNNEL_PORT`             | `8100`    |
//! | `MICROTUNNEL_BIND`             | `0.0.0.0` |
//! | `MICROTUNNEL_POLL_INTERVAL_MS` | `2`       |
//! | `MICROTUNNEL_CONNECT_TIMEOUT`  | `10`      |
//! | `MICROTUNNEL_WRITE_TIMEOUT`    | `5`       |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use microtunnel_broker::domain::BrokerConfig;
use microtunnel_broker::infrastructure::{Reactor, SystemResolver};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Single-tenant TCP/UDP/DNS tunneling broker.
#[derive(Debug, Parser)]
#[command(
    name = "microtunnel-broker",
    about = "Tunneling broker driven over one binary control channel",
    version
)]
struct Cli {
    /// TCP port for the control listener.
    #[arg(long, default_value_t = 8100, env = "MICROTUNNEL_PORT")]
    port: u16,

    /// IP address for the control listener.
    ///
    /// `0.0.0.0` accepts control clients on every interface.
    #[arg(long, default_value = "0.0.0.0", env = "MICROTUNNEL_BIND")]
    bind: String,

    /// Milliseconds to sleep after a reactor tick that found nothing to do.
    #[arg(long, default_value_t = 2, env = "MICROTUNNEL_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Seconds to wait for an outbound OPEN_TCP connection.
    #[arg(long, default_value_t = 10, env = "MICROTUNNEL_CONNECT_TIMEOUT")]
    connect_timeout_secs: u64,

    /// Seconds allowed for writing one frame before the peer is considered dead.
    #[arg(long, default_value_t = 5, env = "MICROTUNNEL_WRITE_TIMEOUT")]
    write_timeout_secs: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BrokerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address, or if
    /// `--poll-interval-ms` or either timeout is zero.
    fn into_broker_config(self) -> anyhow::Result<BrokerConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;

        anyhow::ensure!(
            self.poll_interval_ms > 0,
            "--poll-interval-ms must be at least 1"
        );
        anyhow::ensure!(
            self.connect_timeout_secs > 0,
            "--connect-timeout-secs must be at least 1"
        );
        anyhow::ensure!(
            self.write_timeout_secs > 0,
            "--write-timeout-secs must be at least 1"
        );

        Ok(BrokerConfig {
            listen_addr: SocketAddr::new(ip, self.port),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// The broker is single-threaded by construction, so it runs on tokio's
/// current-thread runtime.  A bind failure propagates out of `main` and the
/// process exits non-zero.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_broker_config()?;
    info!(
        "microtunnel broker starting: listen={}, poll={:?}, connect_timeout={:?}, write_timeout={:?}",
        config.listen_addr, config.poll_interval, config.connect_timeout, config.write_timeout
    );

    let reactor = Reactor::bind(config.clone(), Arc::new(SystemResolver))
        .await
        .with_context(|| format!("cannot start broker on {}", config.listen_addr))?;

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    reactor.run(running).await;

    info!("microtunnel broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
