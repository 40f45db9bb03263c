// src/core/rate_limit.rs

//! A sliding-window admission gate keyed by (client IP, endpoint).
//!
//! One global mutex serializes all checks. That is deliberate: the critical
//! section is a map lookup and a timestamp write, and the coarse lock keeps
//! the component trivially correct under concurrency.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Above this many tracked keys, an insert triggers an inline sweep of
/// entries idle past [`PRUNE_AFTER`]. Keeps the map bounded by live traffic
/// rather than by the historical key space.
const MAX_TRACKED_KEYS: usize = 65_536;
const PRUNE_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<(IpAddr, String), Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a request from `ip` to `endpoint` is admitted. The
    /// first request for a key always passes; afterwards a request passes
    /// only once `window` has elapsed since the last admitted one. Denied
    /// requests do not push the window forward.
    pub fn allowed(&self, ip: IpAddr, endpoint: &str, window: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        if let Some(last_request) = entries.get_mut(&(ip, endpoint.to_string())) {
            if now.duration_since(*last_request) < window {
                return false;
            }
            *last_request = now;
            return true;
        }

        if entries.len() >= MAX_TRACKED_KEYS {
            entries.retain(|_, last| now.duration_since(*last) < PRUNE_AFTER);
        }
        entries.insert((ip, endpoint.to_string()), now);
        true
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
