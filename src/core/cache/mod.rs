// src/core/cache/mod.rs

//! A minimal client for the key-value cache holding session state.
//!
//! The cache speaks RESP over one TCP connection. The client connects
//! lazily, serializes commands behind an async mutex, and drops the
//! connection on any transport error so the next command reconnects.
//! Callers (the session store) translate every failure here into an
//! invalid-session outcome; nothing backend-specific escapes this layer.

use crate::config::CacheConfig;
use crate::core::GlossdError;
use crate::core::protocol::{RespCodec, RespValue};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Per-command deadline covering connect, send, and reply.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

type CacheStream = Framed<TcpStream, RespCodec>;

pub struct CacheClient {
    addr: String,
    conn: Mutex<Option<CacheStream>>,
}

impl CacheClient {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            conn: Mutex::new(None),
        }
    }

    /// Round-trips a PING. Used at startup to verify the cache is reachable
    /// before the server accepts traffic.
    pub async fn ping(&self) -> Result<(), GlossdError> {
        let reply = self.command(&[b"PING".as_slice()]).await?;
        match reply {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(GlossdError::Cache(format!(
                "Unexpected PING reply: {other:?}"
            ))),
        }
    }

    /// Stores field/value pairs in the hash at `key`.
    pub async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), GlossdError> {
        let mut args: Vec<&[u8]> = vec![b"HSET", key.as_bytes()];
        for (field, value) in fields {
            args.push(field.as_bytes());
            args.push(value.as_bytes());
        }
        self.command(&args).await?.into_ok()
    }

    /// Reads the whole hash at `key`; an absent key yields an empty map.
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, GlossdError> {
        let reply = self.command(&[b"HGETALL".as_slice(), key.as_bytes()]).await?;
        let RespValue::Array(items) = reply else {
            return Err(GlossdError::Cache(format!(
                "Unexpected HGETALL reply: {reply:?}"
            )));
        };

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            if let (Some(f), Some(v)) = (field.as_string(), value.as_string()) {
                map.insert(f, v);
            }
        }
        Ok(map)
    }

    /// Sets the TTL on `key`; `false` means the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool, GlossdError> {
        let secs = seconds.to_string();
        let reply = self
            .command(&[b"EXPIRE".as_slice(), key.as_bytes(), secs.as_bytes()])
            .await?;
        Ok(reply.as_integer() == Some(1))
    }

    /// Deletes `key`; `false` means there was nothing to delete.
    pub async fn del(&self, key: &str) -> Result<bool, GlossdError> {
        let reply = self.command(&[b"DEL".as_slice(), key.as_bytes()]).await?;
        Ok(reply.as_integer().unwrap_or(0) > 0)
    }

    /// Adds `member` to the set at `key`.
    pub async fn sadd(&self, key: &str, member: &str) -> Result<(), GlossdError> {
        self.command(&[b"SADD".as_slice(), key.as_bytes(), member.as_bytes()])
            .await?
            .into_ok()
    }

    /// Removes `member` from the set at `key`.
    pub async fn srem(&self, key: &str, member: &str) -> Result<(), GlossdError> {
        self.command(&[b"SREM".as_slice(), key.as_bytes(), member.as_bytes()])
            .await?
            .into_ok()
    }

    /// Sends one command and awaits its reply, reconnecting if needed. On any
    /// transport error the connection is discarded so the next command starts
    /// from a clean connect.
    async fn command(&self, args: &[&[u8]]) -> Result<RespValue, GlossdError> {
        let mut guard = self.conn.lock().await;

        match timeout(COMMAND_TIMEOUT, Self::exchange(&mut guard, &self.addr, args)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                *guard = None;
                debug!("Cache command failed: {e}");
                Err(e)
            }
            Err(_) => {
                *guard = None;
                warn!("Cache command timed out after {COMMAND_TIMEOUT:?}");
                Err(GlossdError::Cache("Cache operation timed out".to_string()))
            }
        }
    }

    async fn exchange(
        guard: &mut Option<CacheStream>,
        addr: &str,
        args: &[&[u8]],
    ) -> Result<RespValue, GlossdError> {
        if guard.is_none() {
            let socket = TcpStream::connect(addr)
                .await
                .map_err(|e| GlossdError::Cache(format!("Failed to connect to cache: {e}")))?;
            *guard = Some(Framed::new(socket, RespCodec));
        }
        let framed = guard.as_mut().expect("connection just established");

        framed.send(RespValue::command(args)).await?;
        match framed.next().await {
            Some(Ok(RespValue::Error(msg))) => Err(GlossdError::Cache(msg)),
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(e),
            None => Err(GlossdError::Cache(
                "Cache closed the connection".to_string(),
            )),
        }
    }
}

impl RespValue {
    /// Collapses a reply whose content does not matter into success.
    fn into_ok(self) -> Result<(), GlossdError> {
        match self {
            RespValue::Error(msg) => Err(GlossdError::Cache(msg)),
            _ => Ok(()),
        }
    }
}
