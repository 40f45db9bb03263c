// src/core/db/mod.rs

//! Database access: the fixed-size connection pool and the per-session
//! binding that caches a pooled connection between requests.

mod binding;
mod pool;

pub use binding::{DbBinding, PgBinding};
pub use pool::{ConnectionPool, ManagedConnection, PgPool, PooledConnection};
