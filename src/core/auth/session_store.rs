// src/core/auth/session_store.rs

//! The cache-backed store of live sessions.
//!
//! Records live under `session:<token>` with a store-level TTL; every token
//! is also indexed under `user:<id>:sessions` so all of a user's sessions
//! can be found for bulk invalidation. Any cache-backend failure is mapped
//! to an invalid-session outcome here; callers never see transport detail.

use super::token;
use crate::core::GlossdError;
use crate::core::cache::CacheClient;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The fields stored for one authenticated session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub user_id: i64,
    pub created_at: u64,
    pub expires_at: u64,
    pub ip_address: String,
}

impl SessionRecord {
    /// Whether the record is past its expiry at the given Unix time. The
    /// store's TTL normally reaps the record first; this guards the window
    /// between expiry and reaping.
    pub fn is_expired_at(&self, now_unix: u64) -> bool {
        now_unix > self.expires_at
    }

    fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            user_id: fields.get("user_id")?.parse().ok()?,
            created_at: fields.get("created_at")?.parse().ok()?,
            expires_at: fields.get("expires_at")?.parse().ok()?,
            ip_address: fields.get("ip_address").cloned().unwrap_or_default(),
        })
    }
}

pub struct SessionStore {
    cache: Arc<CacheClient>,
    secret: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<CacheClient>, secret: String, ttl: Duration) -> Self {
        Self { cache, secret, ttl }
    }

    /// TTL applied to sessions issued by this store.
    pub fn session_ttl(&self) -> Duration {
        self.ttl
    }

    fn session_key(token: &str) -> String {
        format!("session:{token}")
    }

    fn user_index_key(user_id: i64) -> String {
        format!("user:{user_id}:sessions")
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Issues a fresh signed token for `user_id` and persists its record with
    /// the store TTL. Returns the token the client should carry.
    pub async fn create(&self, user_id: i64, ip: IpAddr) -> Result<String, GlossdError> {
        let signed = token::mint_token(&self.secret);
        let created_at = Self::now_unix();
        let expires_at = created_at + self.ttl.as_secs();

        let key = Self::session_key(&signed);
        let created = created_at.to_string();
        let expires = expires_at.to_string();
        let uid = user_id.to_string();
        let ip_str = ip.to_string();

        self.cache
            .hset(
                &key,
                &[
                    ("user_id", uid.as_str()),
                    ("created_at", created.as_str()),
                    ("expires_at", expires.as_str()),
                    ("ip_address", ip_str.as_str()),
                ],
            )
            .await?;
        self.cache.expire(&key, self.ttl.as_secs()).await?;
        self.cache
            .sadd(&Self::user_index_key(user_id), &signed)
            .await?;

        Ok(signed)
    }

    /// Resolves a presented token to its user id. Fails with the same
    /// `SessionInvalid` whether the token is forged, expired, absent, or the
    /// backend is unreachable; the distinction is logged, not returned.
    pub async fn lookup(&self, presented: &str) -> Result<i64, GlossdError> {
        if !token::validate(presented, &self.secret) {
            debug!("Session token failed signature validation");
            return Err(GlossdError::SessionInvalid);
        }

        let fields = self
            .cache
            .hgetall(&Self::session_key(presented))
            .await
            .map_err(|e| {
                debug!("Cache lookup failed during session validation: {e}");
                GlossdError::SessionInvalid
            })?;

        if fields.is_empty() {
            debug!("Session record not found");
            return Err(GlossdError::SessionInvalid);
        }

        let Some(record) = SessionRecord::from_fields(&fields) else {
            debug!("Session record is malformed");
            return Err(GlossdError::SessionInvalid);
        };

        if record.is_expired_at(Self::now_unix()) {
            debug!("Session record has expired");
            return Err(GlossdError::SessionInvalid);
        }

        Ok(record.user_id)
    }

    /// Deletes a session. Idempotent: `Ok(false)` means there was nothing to
    /// delete, which is not an error.
    pub async fn invalidate(&self, presented: &str) -> Result<bool, GlossdError> {
        let key = Self::session_key(presented);

        let fields = self.cache.hgetall(&key).await.map_err(|e| {
            debug!("Cache lookup failed during session invalidation: {e}");
            GlossdError::SessionInvalid
        })?;

        if fields.is_empty() {
            return Ok(false);
        }

        let deleted = self.cache.del(&key).await.map_err(|e| {
            debug!("Cache delete failed during session invalidation: {e}");
            GlossdError::SessionInvalid
        })?;

        // Keep the per-user index in step with the record itself.
        if let Some(record) = SessionRecord::from_fields(&fields) {
            let _ = self
                .cache
                .srem(&Self::user_index_key(record.user_id), presented)
                .await;
        }

        Ok(deleted)
    }
}
