//! Per-query resolution pipeline.
//!
//! For each query:
//! 1. Cache lookup, answered with the query's own transaction ID on a hit
//! 2. On a miss, join the in-flight registry so concurrent misses share one upstream call
//! 3. Upstream round trip, then cache the reply if it carries a `max-age`
//!
//! Transports handle the actual I/O; the dispatcher decides what to send back.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::{CacheKey, Clock, ResponseCache, SystemClock};
use crate::dns;
use crate::singleflight::{Flight, InFlight};
use crate::stats::{Stats, StatsSnapshot};
use crate::upstream::Upstream;

/// Result of dispatching one query.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Answered from the cache.
    Cached(Vec<u8>),
    /// Answered by the upstream.
    Forwarded(Bytes),
    /// Answered by another query's upstream call for the same question.
    Coalesced(Vec<u8>),
    /// No answer; nothing is sent back.
    Dropped,
}

impl Outcome {
    /// Bytes to send back to the client, if any.
    pub fn reply(&self) -> Option<&[u8]> {
        match self {
            Outcome::Cached(reply) | Outcome::Coalesced(reply) => Some(reply),
            Outcome::Forwarded(reply) => Some(reply),
            Outcome::Dropped => None,
        }
    }
}

/// Shared by every worker; holds no per-query state.
pub struct Dispatcher<U, C = SystemClock> {
    upstream: U,
    cache: Arc<ResponseCache<C>>,
    inflight: Option<InFlight>,
    stats: Stats,
}

impl<U: Upstream, C: Clock> Dispatcher<U, C> {
    /// Create a dispatcher with in-flight coalescing enabled.
    pub fn new(upstream: U, cache: Arc<ResponseCache<C>>) -> Self {
        Self {
            upstream,
            cache,
            inflight: Some(InFlight::new()),
            stats: Stats::new(),
        }
    }

    /// Send every cache miss upstream, even when an identical one is pending.
    pub fn without_coalescing(mut self) -> Self {
        self.inflight = None;
        self
    }

    /// Resolve a raw DNS query.
    pub async fn dispatch(&self, query: &[u8]) -> Outcome {
        let start = Instant::now();
        let domain = dns::question_name(query).unwrap_or_else(|| "<unknown>".to_string());

        if let Some(reply) = self.cache.get(query) {
            let elapsed = start.elapsed();
            self.stats.record_cached(elapsed);
            debug!(domain = %domain, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "CACHED");
            return Outcome::Cached(reply);
        }

        let flight = match (&self.inflight, CacheKey::from_query(query)) {
            (Some(inflight), Some(key)) => Some(inflight.join(key)),
            _ => None,
        };

        match flight {
            Some(Flight::Follower(leader)) => {
                let reply = leader
                    .await
                    .ok()
                    .flatten()
                    .and_then(|reply| dns::with_transaction_id(&reply, query));
                let Some(reply) = reply else {
                    self.stats.record_dropped();
                    warn!(domain = %domain, "coalesced upstream request failed, dropping query");
                    return Outcome::Dropped;
                };
                let elapsed = start.elapsed();
                self.stats.record_coalesced(elapsed);
                debug!(domain = %domain, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "COALESCED");
                Outcome::Coalesced(reply)
            }
            Some(Flight::Leader(guard)) => {
                let outcome = self.forward(query, &domain, start).await;
                let shared = match &outcome {
                    Outcome::Forwarded(reply) => Some(reply.clone()),
                    _ => None,
                };
                guard.complete(shared);
                outcome
            }
            None => self.forward(query, &domain, start).await,
        }
    }

    async fn forward(&self, query: &[u8], domain: &str, start: Instant) -> Outcome {
        let upstream_start = Instant::now();
        let response = match self.upstream.exchange(query).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_dropped();
                warn!(domain = %domain, error = %e, "upstream request failed, dropping query");
                return Outcome::Dropped;
            }
        };
        let upstream_ms = upstream_start.elapsed().as_secs_f64() * 1000.0;

        match self.cache.put(query, &response.body, &response.headers) {
            Ok(ttl) => debug!(domain = %domain, ttl_secs = ttl.as_secs(), "stored reply"),
            Err(e) => debug!(domain = %domain, reason = %e, "reply not cached"),
        }

        let elapsed = start.elapsed();
        self.stats.record_forwarded(elapsed);
        debug!(
            domain = %domain,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            upstream_ms,
            "FORWARDED"
        );
        Outcome::Forwarded(response.body)
    }

    pub fn cache(&self) -> &ResponseCache<C> {
        &self.cache
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::tests::{ManualClock, max_age};
    use crate::dns::tests::{build_query, build_response};
    use crate::error::UpstreamError;
    use crate::upstream::UpstreamResponse;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Upstream answering every query with a fixed A record.
    pub(crate) struct MockUpstream {
        calls: Arc<AtomicUsize>,
        headers: HeaderMap,
        fail: bool,
        gate: Option<Arc<Notify>>,
        panic_on: Option<&'static str>,
    }

    impl MockUpstream {
        pub(crate) fn caching(secs: u64) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                headers: max_age(secs),
                fail: false,
                gate: None,
                panic_on: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::caching(60)
            }
        }

        pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Panic while resolving `domain`, as a bug in the upstream would.
        pub(crate) fn panicking_on(mut self, domain: &'static str) -> Self {
            self.panic_on = Some(domain);
            self
        }

        pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    impl Upstream for MockUpstream {
        async fn exchange(&self, query: &[u8]) -> Result<UpstreamResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panic_on.is_some() && dns::question_name(query).as_deref() == self.panic_on {
                panic!("upstream bug");
            }
            if self.fail {
                return Err(UpstreamError::Status(StatusCode::BAD_GATEWAY));
            }
            Ok(UpstreamResponse {
                body: Bytes::from(build_response(query, [192, 0, 2, 7])),
                headers: self.headers.clone(),
            })
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let upstream = MockUpstream::caching(60);
        let calls = upstream.call_counter();
        let dispatcher = Dispatcher::new(upstream, Arc::new(ResponseCache::new()));

        let first = build_query(0x0001, "example.com");
        let outcome = dispatcher.dispatch(&first).await;
        assert!(matches!(outcome, Outcome::Forwarded(_)));
        assert_eq!(&outcome.reply().unwrap()[..2], &[0x00, 0x01]);

        let second = build_query(0x0202, "example.com");
        let outcome = dispatcher.dispatch(&second).await;
        let Outcome::Cached(reply) = outcome else {
            panic!("expected cache hit, got {outcome:?}");
        };
        assert_eq!(&reply[..2], &[0x02, 0x02]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = dispatcher.stats_snapshot_and_reset();
        assert_eq!((snapshot.forwarded, snapshot.cached), (1, 1));
    }

    #[tokio::test]
    async fn expired_entry_goes_back_upstream() {
        let clock = ManualClock::new();
        let upstream = MockUpstream::caching(30);
        let calls = upstream.call_counter();
        let dispatcher = Dispatcher::new(upstream, Arc::new(ResponseCache::with_clock(clock.clone())));
        let query = build_query(5, "example.com");

        dispatcher.dispatch(&query).await;
        clock.advance(Duration::from_secs(31));
        let outcome = dispatcher.dispatch(&query).await;

        assert!(matches!(outcome, Outcome::Forwarded(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn uncacheable_reply_is_relayed_but_not_stored() {
        let mut upstream = MockUpstream::caching(60);
        upstream.headers = HeaderMap::new();
        let calls = upstream.call_counter();
        let dispatcher = Dispatcher::new(upstream, Arc::new(ResponseCache::new()));
        let query = build_query(5, "example.com");

        assert!(dispatcher.dispatch(&query).await.reply().is_some());
        assert!(dispatcher.dispatch(&query).await.reply().is_some());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn huge_max_age_is_still_answered_and_cached() {
        let upstream = MockUpstream::caching(u64::MAX);
        let calls = upstream.call_counter();
        let dispatcher = Dispatcher::new(upstream, Arc::new(ResponseCache::new()));

        let outcome = dispatcher.dispatch(&build_query(1, "example.com")).await;
        assert!(matches!(outcome, Outcome::Forwarded(_)));

        let outcome = dispatcher.dispatch(&build_query(2, "example.com")).await;
        assert!(matches!(outcome, Outcome::Cached(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_failure_drops_query() {
        let dispatcher = Dispatcher::new(MockUpstream::failing(), Arc::new(ResponseCache::new()));

        let outcome = dispatcher.dispatch(&build_query(5, "example.com")).await;

        assert_eq!(outcome, Outcome::Dropped);
        assert!(outcome.reply().is_none());
        assert!(dispatcher.cache().is_empty());
        assert_eq!(dispatcher.stats_snapshot_and_reset().dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_misses_share_one_upstream_call() {
        let gate = Arc::new(Notify::new());
        let upstream = MockUpstream::caching(60).gated(gate.clone());
        let calls = upstream.call_counter();
        let dispatcher = Arc::new(Dispatcher::new(upstream, Arc::new(ResponseCache::new())));

        let leader = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(&build_query(0x1111, "example.com")).await })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let followers: Vec<_> = (0..4u16)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(&build_query(0x2000 + i, "example.com")).await })
            })
            .collect();
        while dispatcher.inflight.as_ref().map_or(0, InFlight::waiters) < 4 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert!(matches!(leader.await.unwrap(), Outcome::Forwarded(_)));
        for (i, follower) in futures::future::join_all(followers).await.into_iter().enumerate() {
            let Outcome::Coalesced(reply) = follower.unwrap() else {
                panic!("follower {i} was not coalesced");
            };
            assert_eq!(&reply[..2], &(0x2000 + i as u16).to_be_bytes());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn coalescing_can_be_disabled() {
        let dispatcher = Dispatcher::new(MockUpstream::caching(60), Arc::new(ResponseCache::new())).without_coalescing();

        let outcome = dispatcher.dispatch(&build_query(1, "example.com")).await;

        assert!(matches!(outcome, Outcome::Forwarded(_)));
        assert!(dispatcher.inflight.is_none());
    }
}
