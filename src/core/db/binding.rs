// src/core/db/binding.rs

//! A per-session database binding that caches one pooled connection across
//! consecutive requests on the same client connection.
//!
//! Keep-alive clients do not pay a pool round-trip for every request, and
//! the idle ceiling bounds how long one session can sit on a connection it
//! is not using.

use super::pool::{ConnectionPool, ManagedConnection, PooledConnection};
use crate::core::GlossdError;
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::warn;

/// A cached connection idle longer than this is returned to the pool and a
/// fresh one acquired on the next use.
const BINDING_IDLE_LIMIT: Duration = Duration::from_secs(60);

struct CachedConn<C: ManagedConnection> {
    conn: PooledConnection<C>,
    last_used: Instant,
}

/// One binding exists per connection session and is revalidated on every use.
/// At most one transaction is live per binding at a time; the borrow on the
/// returned [`Transaction`] enforces this.
pub struct DbBinding<C: ManagedConnection> {
    pool: ConnectionPool<C>,
    cached: Option<CachedConn<C>>,
    /// Set when the last operation on the cached connection failed; the next
    /// use swaps the connection out instead of reusing it.
    poisoned: bool,
}

/// The production binding type.
pub type PgBinding = DbBinding<PgConnection>;

impl<C: ManagedConnection> DbBinding<C> {
    pub fn new(pool: ConnectionPool<C>) -> Self {
        Self {
            pool,
            cached: None,
            poisoned: false,
        }
    }

    /// Marks the cached connection as suspect after a failed operation.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Makes sure `self.cached` holds a usable connection, recycling a
    /// poisoned or idle-expired one first.
    async fn ensure_connection(&mut self) -> Result<(), GlossdError> {
        let now = Instant::now();
        let recycle = match &self.cached {
            Some(c) => {
                self.poisoned
                    || !c.conn.is_healthy()
                    || now.duration_since(c.last_used) > BINDING_IDLE_LIMIT
            }
            None => false,
        };

        if recycle && let Some(mut c) = self.cached.take() {
            if self.poisoned {
                c.conn.mark_unhealthy();
            }
            if let Err(e) = self.pool.release(c.conn).await {
                warn!("Failed to recycle database connection: {e}");
            }
        }
        self.poisoned = false;

        if self.cached.is_none() {
            let conn = self.pool.acquire().await?;
            self.cached = Some(CachedConn {
                conn,
                last_used: now,
            });
        }
        Ok(())
    }

    /// Direct access to the cached connection, acquiring one if needed.
    pub async fn connection(&mut self) -> Result<&mut PooledConnection<C>, GlossdError> {
        self.ensure_connection().await?;
        let cached = self.cached.as_mut().expect("binding just ensured");
        cached.last_used = Instant::now();
        Ok(&mut cached.conn)
    }

    /// Returns the cached connection to the pool. Called on session teardown;
    /// a binding dropped without this still returns its connection through
    /// the pool guard's drop path.
    pub async fn release(&mut self) {
        if let Some(c) = self.cached.take()
            && let Err(e) = self.pool.release(c.conn).await
        {
            warn!("Failed to release database connection on teardown: {e}");
        }
    }
}

impl DbBinding<PgConnection> {
    /// Begins a transaction on the cached connection. The caller commits it
    /// before the next `begin_transaction` on the same binding.
    pub async fn begin_transaction(
        &mut self,
    ) -> Result<Transaction<'_, Postgres>, GlossdError> {
        self.ensure_connection().await?;
        let cached = self.cached.as_mut().expect("binding just ensured");
        cached.last_used = Instant::now();
        Ok(Connection::begin(&mut *cached.conn).await?)
    }
}
