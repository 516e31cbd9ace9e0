use crate::token::{checked_offset, Clock};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

/// A resolved bundle download location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// URL to download the bundle from.
    pub url: Url,
    /// Instant at which `url` stops working.
    pub expires_at: OffsetDateTime,
    /// Response headers to capture from the download.
    pub capture_headers: Vec<String>,
}

/// TTL-aware map from bundle id to its current download location.
pub struct UrlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Clock,
}

impl Debug for UrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("UrlCache").field("entries", &len).finish()
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlCache {
    /// Creates an empty cache using the system clock.
    pub fn new() -> Self {
        Self::with_clock(crate::token::system_clock())
    }

    /// Creates an empty cache that reads the current time from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the entry for `key` if it stays valid for more than `min_ttl` from now.
    ///
    /// A `min_ttl` reaching past the representable calendar never hits.
    pub fn get(&self, key: &str, min_ttl: Duration) -> Option<CacheEntry> {
        let min_expiration = checked_offset((self.clock)(), min_ttl)?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.expires_at > min_expiration)
            .cloned()
    }

    /// Stores `entry` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, entry: CacheEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Drops the entry for `key`, if any.
    pub fn remove(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }
}
