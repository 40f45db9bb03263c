// src/connection/session.rs

//! The per-connection protocol state machine.
//!
//! One `ConnectionSession` exists per accepted socket and drives it through
//! `HANDSHAKE -> READING -> WRITING -> (READING | CLOSING) -> CLOSED`, with
//! the plaintext variant skipping the handshake. Each I/O phase runs under
//! its own deadline; deadline expiry force-closes the transport, which is the
//! only cancellation mechanism. At most one timer is outstanding at a time,
//! and a timer can never outlive the phase it belongs to.

use super::guard::ConnectionGuard;
use crate::config::TimeoutConfig;
use crate::core::GlossdError;
use crate::core::db::DbBinding;
use crate::core::db::PgBinding;
use crate::core::handlers::RequestContext;
use crate::core::protocol::HttpCodec;
use crate::core::state::ServerState;
use crate::server::Transport;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Deadline on the close-notify exchange during graceful teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    Reading,
    Writing,
    Closing,
    Closed,
}

/// Why the serve loop ended; decides whether teardown is graceful.
enum Teardown {
    /// Peer closed, keep-alive ended, or shutdown signal: close-notify, FIN.
    Graceful,
    /// A deadline expired: abandon the transport without ceremony.
    Forced,
}

pub struct ConnectionSession {
    state: Arc<ServerState>,
    session_id: u64,
    addr: SocketAddr,
    shutdown_rx: broadcast::Receiver<()>,
    phase: Phase,
    binding: PgBinding,
}

impl ConnectionSession {
    pub fn new(
        state: Arc<ServerState>,
        session_id: u64,
        addr: SocketAddr,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let binding = DbBinding::new(state.db_pool.clone());
        Self {
            state,
            session_id,
            addr,
            shutdown_rx,
            phase: Phase::Handshake,
            binding,
        }
    }

    fn enter(&mut self, next: Phase) {
        trace!(
            "Session {}: {:?} -> {:?}",
            self.session_id, self.phase, next
        );
        self.phase = next;
    }

    /// Drives the connection to completion. Consumes the session; all
    /// per-session resources are released before this returns.
    pub async fn run(mut self, socket: TcpStream, acceptor: Option<TlsAcceptor>) {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        let timeouts = self.state.config.timeouts.clone();

        let transport = match acceptor {
            Some(acceptor) => {
                self.enter(Phase::Handshake);
                match timeout(timeouts.handshake, acceptor.accept(socket)).await {
                    Ok(Ok(tls)) => {
                        debug!("TLS handshake successful for {}", self.addr);
                        Transport::Tls(Box::new(tls))
                    }
                    Ok(Err(e)) => {
                        warn!("Handshake error for {}: {}", self.addr, e);
                        self.enter(Phase::Closed);
                        return;
                    }
                    Err(_) => {
                        warn!("Handshake deadline expired for {}", self.addr);
                        self.enter(Phase::Closed);
                        return;
                    }
                }
            }
            None => Transport::Plain(socket),
        };

        let mut framed = Framed::new(transport, HttpCodec);
        let teardown = self.serve(&mut framed, &timeouts).await;

        self.enter(Phase::Closing);
        if let Teardown::Graceful = teardown {
            graceful_shutdown(&mut framed, self.addr).await;
        }
        self.enter(Phase::Closed);

        // Hand the cached database connection back before the session ends.
        self.binding.release().await;
    }

    /// The READING/WRITING loop. Returns how the transport should be torn
    /// down; never performs I/O after deciding.
    async fn serve(
        &mut self,
        framed: &mut Framed<Transport, HttpCodec>,
        timeouts: &TimeoutConfig,
    ) -> Teardown {
        loop {
            self.enter(Phase::Reading);
            let req = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Session {} closing for server shutdown", self.session_id);
                    return Teardown::Graceful;
                }
                res = timeout(timeouts.read, framed.next()) => match res {
                    Err(_) => {
                        debug!("Read deadline expired for {}, forcing close", self.addr);
                        return Teardown::Forced;
                    }
                    Ok(None) => {
                        debug!("Connection from {} closed by peer.", self.addr);
                        return Teardown::Graceful;
                    }
                    Ok(Some(Err(e))) => {
                        if is_normal_disconnect(&e) {
                            debug!("Connection from {} closed by peer: {}", self.addr, e);
                        } else {
                            warn!("Read error for {}: {}", self.addr, e);
                        }
                        return Teardown::Graceful;
                    }
                    Ok(Some(Ok(req))) => req,
                }
            };

            let keep_alive = req.keep_alive();
            let dispatcher = &self.state.dispatcher;
            let mut ctx = RequestContext {
                client_ip: self.addr.ip(),
                db: &mut self.binding,
            };
            let res = dispatcher.dispatch(&req, &mut ctx).await;
            let close_after = res.close || !keep_alive;

            self.enter(Phase::Writing);
            match timeout(timeouts.write, framed.send(res)).await {
                Err(_) => {
                    debug!("Write deadline expired for {}, forcing close", self.addr);
                    return Teardown::Forced;
                }
                Ok(Err(e)) => {
                    warn!("Write error for {}: {}", self.addr, e);
                    return Teardown::Graceful;
                }
                Ok(Ok(())) => {}
            }

            if close_after {
                return Teardown::Graceful;
            }
        }
    }
}

/// Shuts the transport down cleanly (close-notify on TLS), treating the
/// usual end-of-connection errors as benign. The socket itself closes when
/// the framed transport drops.
async fn graceful_shutdown(framed: &mut Framed<Transport, HttpCodec>, addr: SocketAddr) {
    let transport = framed.get_mut();
    match timeout(SHUTDOWN_TIMEOUT, transport.shutdown()).await {
        Err(_) => debug!("Shutdown deadline expired for {addr}"),
        Ok(Err(e)) if is_benign_shutdown_error(&e) => {}
        Ok(Err(e)) => warn!("Shutdown error for {addr}: {e}"),
        Ok(Ok(())) => {}
    }
}

fn is_benign_shutdown_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::TimedOut
    )
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &GlossdError) -> bool {
    matches!(e, GlossdError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
