// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown. The acceptor never waits on a session: every accepted
//! socket is handed to its own `ConnectionSession` task immediately, so one
//! slow client cannot stall the listener or any other session.

use super::context::ServerContext;
use crate::connection::ConnectionSession;
use crate::core::state::ClientInfo;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(ctx: ServerContext) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        debug!("Accepted new connection from: {}", addr);

                        session_id_counter = session_id_counter.wrapping_add(1);
                        let session_id = session_id_counter;
                        ctx.state.clients.insert(session_id, ClientInfo {
                            addr,
                            created: Instant::now(),
                        });

                        let session = ConnectionSession::new(
                            ctx.state.clone(),
                            session_id,
                            addr,
                            ctx.shutdown_tx.subscribe(),
                        );
                        let acceptor = ctx.acceptor.clone();
                        client_tasks.spawn(session.run(socket, acceptor));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client session panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all sessions.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No active sessions to notify.");
    }

    if tokio::time::timeout(Duration::from_secs(10), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for sessions to close cleanly; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed. Server shutdown complete.");
}
