// src/core/state.rs

//! Defines the central `ServerState` struct shared by all connections.
//!
//! Every service lives here as an explicitly constructed object, wired up
//! once at startup and injected by `Arc`; there are no lazily-initialized
//! globals anywhere in the process.

use crate::config::Config;
use crate::core::auth::SessionStore;
use crate::core::cache::CacheClient;
use crate::core::db::PgPool;
use crate::core::dispatch::Dispatcher;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Bookkeeping for one connected client, for logging and observability.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub created: Instant,
}

/// The process-wide state: configuration plus the injected services.
pub struct ServerState {
    pub config: Config,
    pub db_pool: PgPool,
    pub cache: Arc<CacheClient>,
    pub sessions: Arc<SessionStore>,
    pub dispatcher: Dispatcher,
    /// Live connections, keyed by session id. Entries are inserted by the
    /// accept loop and removed by each session's connection guard.
    pub clients: DashMap<u64, ClientInfo>,
}
