//! DNS response cache with TTL-based expiration.
//!
//! Entries are keyed by a digest of the query with its transaction ID
//! stripped, so retransmissions and different clients asking the same
//! question share one entry. Expiry is lazy: an entry past its deadline is
//! removed by the lookup that finds it.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::cache_control;
use crate::dns::{self, ID_LEN};
use crate::error::CacheError;

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// SHA-256 of a query with the transaction ID excluded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for `query`, or `None` if it has no transaction ID.
    pub fn from_query(query: &[u8]) -> Option<Self> {
        let question = query.get(ID_LEN..)?;
        Some(Self(Sha256::digest(question).into()))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Longest TTL an entry is stored with, the DNS TTL ceiling (RFC 2181 section 8).
pub const MAX_TTL: Duration = Duration::from_secs(i32::MAX as u64);

struct CacheEntry {
    reply: Vec<u8>,
    expires_at: Instant,
}

/// TTL-bounded response cache shared by every dispatch.
///
/// A single mutex guards the map; it is held only for the map access and
/// the expiry check, never across I/O.
pub struct ResponseCache<C = SystemClock> {
    entries: Mutex<FxHashMap<CacheKey, CacheEntry>>,
    clock: C,
}

impl ResponseCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResponseCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ResponseCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            clock,
        }
    }

    /// Look up a cached reply for `query`.
    ///
    /// On a hit the reply carries the incoming query's transaction ID.
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, query: &[u8]) -> Option<Vec<u8>> {
        let key = CacheKey::from_query(query)?;
        let now = self.clock.now();

        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        let expires_at = entries.get(&key)?.expires_at;

        if expires_at <= now {
            entries.remove(&key);
            drop(entries);
            tracing::debug!(key = ?key, "cache entry expired");
            return None;
        }

        let reply = dns::with_transaction_id(&entries.get(&key)?.reply, query)?;
        drop(entries);

        let remaining = expires_at - now;

        tracing::trace!(key = ?key, ttl_secs = remaining.as_secs(), "cache hit");
        Some(reply)
    }

    /// Store `reply` for `query`, valid for the `max-age` in `headers`.
    ///
    /// Nothing is stored when the headers carry no usable `max-age`.
    /// Returns the TTL the entry was stored with.
    pub fn put(&self, query: &[u8], reply: &[u8], headers: &HeaderMap) -> Result<Duration, CacheError> {
        let ttl = Duration::from_secs(cache_control::max_age(headers)?);
        self.insert(query, reply, ttl)
    }

    /// Store `reply` for `query` with an explicit TTL, capped at [`MAX_TTL`].
    ///
    /// Returns the TTL the entry was stored with.
    pub fn insert(&self, query: &[u8], reply: &[u8], ttl: Duration) -> Result<Duration, CacheError> {
        if reply.len() < ID_LEN {
            return Err(CacheError::QueryTooShort);
        }
        let key = CacheKey::from_query(query).ok_or(CacheError::QueryTooShort)?;
        let ttl = ttl.min(MAX_TTL);
        let expires_at = self
            .clock
            .now()
            .checked_add(ttl)
            .ok_or(CacheError::TtlOverflow(ttl.as_secs()))?;
        let entry = CacheEntry {
            reply: reply.to_vec(),
            expires_at,
        };

        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!(key = ?key, "cache lock poisoned, reply not stored");
            return Err(CacheError::Unavailable);
        };
        entries.insert(key, entry);
        drop(entries);

        tracing::debug!(key = ?key, ttl_secs = ttl.as_secs(), "cached upstream reply");
        Ok(ttl)
    }

    /// Number of stored entries, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
