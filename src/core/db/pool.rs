// src/core/db/pool.rs

//! A fixed-capacity pool of database connections with health-checked reuse.
//!
//! The pool owns `max_size` connections for its whole lifetime: a connection
//! found dead is destroyed and replaced, never simply discarded. Waiters park
//! on a `Notify` until a connection is returned. The idle queue is guarded by
//! a `std` mutex held only for O(1) operations, never across an await point.

use crate::config::DatabaseConfig;
use crate::core::GlossdError;
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A connection idle longer than this is probed before being handed out.
const IDLE_REVALIDATE: Duration = Duration::from_secs(60);
/// A connection whose last probe is older than this is probed again.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The resource managed by [`ConnectionPool`]: something that can be
/// established from settings, liveness-probed, and closed. The seam exists so
/// the pool's lifecycle logic is testable without a database; production code
/// only ever instantiates it with [`sqlx::PgConnection`].
#[async_trait]
pub trait ManagedConnection: Send + Sized + 'static {
    type Settings: Clone + Send + Sync + 'static;

    async fn establish(settings: &Self::Settings) -> Result<Self, GlossdError>;

    /// A cheap liveness probe. `false` means the connection must be replaced.
    async fn probe(&mut self) -> bool;

    async fn close(self);
}

#[async_trait]
impl ManagedConnection for PgConnection {
    type Settings = DatabaseConfig;

    async fn establish(settings: &DatabaseConfig) -> Result<Self, GlossdError> {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.username)
            .database(&settings.database)
            .application_name("glossd");
        if !settings.password.is_empty() {
            options = options.password(&settings.password);
        }
        // Statements are prepared lazily and cached per physical connection
        // by sqlx, so each new connection re-registers them on first use.
        let conn = PgConnection::connect_with(&options).await?;
        Ok(conn)
    }

    async fn probe(&mut self) -> bool {
        self.ping().await.is_ok()
    }

    async fn close(self) {
        let _ = Connection::close(self).await;
    }
}

/// An idle pool entry: the connection plus its reuse metadata.
struct Slot<C> {
    conn: C,
    last_used: Instant,
    last_checked: Instant,
    healthy: bool,
    /// Set when a guard was dropped without an explicit release; forces a
    /// probe on the next acquire since the connection's state is unknown.
    force_probe: bool,
}

impl<C> Slot<C> {
    fn fresh(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn,
            last_used: now,
            last_checked: now,
            healthy: true,
            force_probe: false,
        }
    }
}

struct IdleState<C> {
    slots: VecDeque<Slot<C>>,
    /// Connections the pool still owes itself: replacements that could not be
    /// created when a dead connection was destroyed. Healed on later acquires
    /// so idle + loaned returns to `max_size` once the backend recovers.
    deficit: usize,
}

struct PoolShared<C: ManagedConnection> {
    settings: C::Settings,
    max_size: usize,
    idle: Mutex<IdleState<C>>,
    available: Notify,
}

impl<C: ManagedConnection> PoolShared<C> {
    fn push(&self, slot: Slot<C>) {
        self.idle.lock().unwrap().slots.push_back(slot);
        self.available.notify_one();
    }
}

/// The connection pool handle. Cloning is cheap and shares the same pool.
pub struct ConnectionPool<C: ManagedConnection> {
    shared: Arc<PoolShared<C>>,
}

/// The production pool type.
pub type PgPool = ConnectionPool<PgConnection>;

impl<C: ManagedConnection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum AcquireStep<C> {
    Got(Box<Slot<C>>),
    Heal,
    Wait,
}

impl<C: ManagedConnection> ConnectionPool<C> {
    /// Creates the pool and eagerly establishes all `max_size` connections.
    /// Any establishment failure is fatal and propagates to the caller; the
    /// server must not start with a partially-initialized pool.
    pub async fn bootstrap(settings: C::Settings, max_size: usize) -> Result<Self, GlossdError> {
        let mut slots = VecDeque::with_capacity(max_size);
        for _ in 0..max_size {
            match C::establish(&settings).await {
                Ok(conn) => slots.push_back(Slot::fresh(conn)),
                Err(e) => {
                    for slot in slots {
                        slot.conn.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            shared: Arc::new(PoolShared {
                settings,
                max_size,
                idle: Mutex::new(IdleState { slots, deficit: 0 }),
                available: Notify::new(),
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    /// Number of connections currently sitting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().unwrap().slots.len()
    }

    /// Takes a connection from the pool, waiting until one is available.
    /// A stale connection is probed first; a dead one is destroyed and a
    /// replacement created before returning. Never hands out a connection
    /// known to be unhealthy.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, GlossdError> {
        loop {
            let step = {
                let mut idle = self.shared.idle.lock().unwrap();
                if let Some(slot) = idle.slots.pop_front() {
                    AcquireStep::Got(Box::new(slot))
                } else if idle.deficit > 0 {
                    idle.deficit -= 1;
                    AcquireStep::Heal
                } else {
                    AcquireStep::Wait
                }
            };

            match step {
                AcquireStep::Got(slot) => return self.revalidate(*slot).await,
                AcquireStep::Heal => {
                    return match Self::establish_with_retry(&self.shared.settings).await {
                        Ok(conn) => {
                            debug!("Healed a missing pool connection");
                            Ok(PooledConnection::new(Slot::fresh(conn), &self.shared))
                        }
                        Err(e) => {
                            self.shared.idle.lock().unwrap().deficit += 1;
                            Err(e)
                        }
                    };
                }
                AcquireStep::Wait => self.shared.available.notified().await,
            }
        }
    }

    /// Returns a connection to the pool and wakes one waiter. An unhealthy
    /// connection is destroyed and replaced before insertion so the pool
    /// size stays constant.
    pub async fn release(&self, mut conn: PooledConnection<C>) -> Result<(), GlossdError> {
        let Some(mut slot) = conn.slot.take() else {
            return Ok(());
        };

        if slot.healthy {
            slot.last_used = Instant::now();
            self.shared.push(slot);
            return Ok(());
        }

        debug!("Replacing unhealthy connection on release");
        slot.conn.close().await;
        match Self::establish_with_retry(&self.shared.settings).await {
            Ok(fresh) => {
                self.shared.push(Slot::fresh(fresh));
                Ok(())
            }
            Err(e) => {
                self.shared.idle.lock().unwrap().deficit += 1;
                Err(e)
            }
        }
    }

    async fn revalidate(&self, mut slot: Slot<C>) -> Result<PooledConnection<C>, GlossdError> {
        let now = Instant::now();
        let needs_probe = slot.force_probe
            || now.duration_since(slot.last_used) > IDLE_REVALIDATE
            || now.duration_since(slot.last_checked) > HEALTH_CHECK_INTERVAL;

        if needs_probe {
            slot.last_checked = now;
            slot.force_probe = false;
            slot.healthy = slot.conn.probe().await;
            if !slot.healthy {
                debug!("Stale pool connection failed its probe, replacing");
                slot.conn.close().await;
                return match Self::establish_with_retry(&self.shared.settings).await {
                    Ok(fresh) => Ok(PooledConnection::new(Slot::fresh(fresh), &self.shared)),
                    Err(e) => {
                        self.shared.idle.lock().unwrap().deficit += 1;
                        Err(e)
                    }
                };
            }
        }

        slot.last_used = now;
        Ok(PooledConnection::new(slot, &self.shared))
    }

    /// One immediate retry on establishment failure; the second error
    /// propagates to the calling operation.
    async fn establish_with_retry(settings: &C::Settings) -> Result<C, GlossdError> {
        match C::establish(settings).await {
            Ok(conn) => Ok(conn),
            Err(first) => {
                warn!("Connection establishment failed ({first}), retrying once");
                C::establish(settings).await
            }
        }
    }
}

/// A connection on loan from the pool. Dereferences to the underlying
/// connection. Return it with [`ConnectionPool::release`]; if the guard is
/// dropped instead (task cancelled, handler panicked), the raw connection
/// goes back to the idle queue flagged for a probe on its next acquire, so
/// the pool-size invariant survives either path.
pub struct PooledConnection<C: ManagedConnection> {
    slot: Option<Slot<C>>,
    shared: Arc<PoolShared<C>>,
}

impl<C: ManagedConnection> PooledConnection<C> {
    fn new(slot: Slot<C>, shared: &Arc<PoolShared<C>>) -> Self {
        Self {
            slot: Some(slot),
            shared: Arc::clone(shared),
        }
    }

    /// Flags the connection as broken; the pool will destroy and replace it
    /// on release instead of reusing it.
    pub fn mark_unhealthy(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.healthy = false;
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.slot.as_ref().map(|s| s.healthy).unwrap_or(false)
    }
}

impl<C: ManagedConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.slot.as_ref().expect("connection already released").conn
    }
}

impl<C: ManagedConnection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.slot.as_mut().expect("connection already released").conn
    }
}

impl<C: ManagedConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            slot.force_probe = true;
            self.shared.push(slot);
        }
    }
}
