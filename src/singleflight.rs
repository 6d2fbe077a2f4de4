//! Coalescing of concurrent cache misses.
//!
//! The first miss for a key becomes the leader and goes upstream; misses
//! for the same key arriving meanwhile wait for the leader's result.

use std::collections::hash_map::Entry;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::cache::CacheKey;

type Waiters = Vec<oneshot::Sender<Option<Bytes>>>;

/// Registry of upstream requests currently in flight, by cache key.
#[derive(Default)]
pub struct InFlight {
    pending: Mutex<FxHashMap<CacheKey, Waiters>>,
}

/// Role of a caller in a flight.
pub enum Flight<'a> {
    /// Perform the request and [`LeaderGuard::complete`] it.
    Leader(LeaderGuard<'a>),
    /// Wait for the leader. Receives `None` if the leader failed.
    Follower(oneshot::Receiver<Option<Bytes>>),
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`.
    pub fn join(&self, key: CacheKey) -> Flight<'_> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.entry(key) {
            Entry::Occupied(mut waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.get_mut().push(tx);
                Flight::Follower(rx)
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                Flight::Leader(LeaderGuard {
                    registry: self,
                    key,
                    done: false,
                })
            }
        }
    }

    /// Number of keys with a request in flight.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn waiters(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// Held by the leader of a flight. Dropping it without completing
/// releases the followers with a failure.
pub struct LeaderGuard<'a> {
    registry: &'a InFlight,
    key: CacheKey,
    done: bool,
}

impl LeaderGuard<'_> {
    /// Hand the result to every follower and close the flight.
    pub fn complete(mut self, reply: Option<Bytes>) {
        self.finish(reply);
    }

    fn finish(&mut self, reply: Option<Bytes>) {
        self.done = true;
        let waiters = self
            .registry
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key)
            .unwrap_or_default();

        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(None);
        }
    }
}
