//! The broker's single-threaded readiness loop.
//!
//! One [`Reactor`] owns the control listener, every [`ClientSession`] and,
//! through them, every proxy socket.  Each tick runs four phases in order:
//!
//! 1. **Accept**: take at most one pending control connection.  Every
//!    session that was live is evicted.
//! 2. **Client read**: feed the live session's assembler and dispatch each
//!    completed frame before reading further, up to
//!    [`MAX_FRAMES_PER_TICK`] frames.
//! 3. **Proxy relay**: give every live proxy one non-blocking read and send
//!    what arrived back to the control client.
//! 4. **Cleanup**: drop dead proxies, then dead sessions (proxies first).
//!
//! Sockets are only touched with `try_*` calls; readiness is tracked by the
//! tokio I/O driver, which runs whenever the loop sleeps or yields.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::FutureExt;
use microtunnel_core::AssemblyEvent;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::application::Dispatcher;
use crate::domain::BrokerConfig;
use crate::infrastructure::resolver::HostResolver;
use crate::infrastructure::session::{ClientSession, ReadOutcome};

/// Frames dispatched per tick before the loop moves on to proxy relay.
pub const MAX_FRAMES_PER_TICK: usize = 32;

/// Error type for broker startup.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// The accept/read/relay/cleanup loop.
pub struct Reactor {
    listener: TcpListener,
    sessions: Vec<ClientSession>,
    dispatcher: Dispatcher,
    config: BrokerConfig,
}

impl Reactor {
    /// Binds the control listener on `config.listen_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Bind`] if the address is in use or not bindable.
    pub async fn bind(
        config: BrokerConfig,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, BrokerError> {
        let listener =
            TcpListener::bind(config.listen_addr)
                .await
                .map_err(|source| BrokerError::Bind {
                    addr: config.listen_addr,
                    source,
                })?;
        let dispatcher = Dispatcher::new(resolver, config.connect_timeout, config.write_timeout);

        Ok(Self {
            listener,
            sessions: Vec::new(),
            dispatcher,
            config,
        })
    }

    /// Address the listener actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        self.listener.local_addr().map_err(BrokerError::LocalAddr)
    }

    /// Sessions not yet removed by cleanup, oldest first.
    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    /// Runs ticks until `running` is cleared.
    ///
    /// An idle tick is followed by a sleep of `poll_interval`; a productive
    /// one only yields to the runtime.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        match self.local_addr() {
            Ok(addr) => info!("microtunnel broker listening on {addr}"),
            Err(e) => warn!("{e}"),
        }

        while running.load(Ordering::Relaxed) {
            if self.tick().await {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        info!(
            "shutdown flag cleared; closing {} control session(s)",
            self.sessions.len()
        );
        for session in &mut self.sessions {
            session.close();
        }
    }

    /// Runs one accept/read/relay/cleanup pass.  Returns `true` if anything
    /// was accepted, read, or relayed.
    pub async fn tick(&mut self) -> bool {
        let mut progress = self.accept_one();
        progress |= self.read_clients().await;
        progress |= self.relay_proxies().await;
        self.cleanup();
        progress
    }

    // ── Phases ───────────────────────────────────────────────────────────────

    fn accept_one(&mut self) -> bool {
        match self.listener.accept().now_or_never() {
            Some(Ok((stream, peer))) => {
                for old in self.sessions.iter_mut().filter(|s| s.is_alive()) {
                    info!(
                        "session {}: evicted by new control client {peer}",
                        old.id()
                    );
                    old.mark_dead();
                }
                let session = ClientSession::new(stream, peer);
                info!("session {}: control client connected from {peer}", session.id());
                self.sessions.push(session);
                true
            }
            Some(Err(e)) => {
                warn!("accept error: {e}");
                false
            }
            None => false,
        }
    }

    async fn read_clients(&mut self) -> bool {
        let mut progress = false;
        let write_timeout = self.config.write_timeout;

        for session in self.sessions.iter_mut().filter(|s| s.is_alive()) {
            let mut frames = 0;
            while frames < MAX_FRAMES_PER_TICK && session.is_alive() {
                match session.read_event() {
                    ReadOutcome::WouldBlock => break,
                    ReadOutcome::Closed => {
                        progress = true;
                        break;
                    }
                    ReadOutcome::Event(event) => {
                        progress = true;
                        match event {
                            AssemblyEvent::Pending => {}
                            AssemblyEvent::Frame(frame) => {
                                frames += 1;
                                let response =
                                    self.dispatcher.dispatch(session.proxies_mut(), &frame).await;
                                if let Some(response) = response {
                                    session.send(&response, write_timeout).await;
                                }
                            }
                            AssemblyEvent::Dropped { declared } => {
                                frames += 1;
                                warn!(
                                    "session {}: dropped frame with unusable length {declared}",
                                    session.id()
                                );
                            }
                        }
                    }
                }
            }
        }
        progress
    }

    async fn relay_proxies(&mut self) -> bool {
        let mut progress = false;
        let write_timeout = self.config.write_timeout;

        for session in self.sessions.iter_mut().filter(|s| s.is_alive()) {
            let mut index = 0;
            while index < session.proxies().len() && session.is_alive() {
                let response = session
                    .proxies_mut()
                    .get_mut(index)
                    .and_then(|proxy| proxy.poll_relay());
                if let Some(response) = response {
                    progress = true;
                    session.send(&response, write_timeout).await;
                }
                index += 1;
            }
        }
        progress
    }

    fn cleanup(&mut self) {
        self.sessions.retain_mut(|session| {
            let closed = session.proxies_mut().retain_live();
            if closed > 0 {
                debug!("session {}: closed {closed} proxy session(s)", session.id());
            }
            if session.is_alive() {
                return true;
            }
            session.close();
            info!(
                "session {}: control connection from {} closed",
                session.id(),
                session.peer()
            );
            false
        });
    }
}
