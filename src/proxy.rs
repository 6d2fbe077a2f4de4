//! DNS-over-HTTPS proxy orchestration.
//!
//! Builds the cache, upstream client and dispatcher, binds the UDP
//! transport and runs the proxy server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::{Clock, ResponseCache};
use crate::dispatcher::Dispatcher;
use crate::error::ProxyError;
use crate::transport::{PoolConfig, UdpTransport};
use crate::upstream::{DohEncoder, DohMethod, HttpsUpstream, Upstream};

/// Configuration for the DNS proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:5553)
    pub bind_addr: SocketAddr,
    /// DoH endpoint receiving every cache miss
    pub upstream_url: String,
    /// How queries are carried to the upstream
    pub method: DohMethod,
    /// Upper bound on an upstream request; `None` keeps transport defaults
    pub timeout: Option<Duration>,
    pub pool: PoolConfig,
    /// Share one upstream request between concurrent identical misses
    pub coalesce: bool,
}

/// Run the DNS proxy with the given configuration.
///
/// Configuration and bind errors are returned before any query is served.
/// After that the proxy runs until one of its tasks stops, which is
/// reported as an error.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    let encoder = DohEncoder::new(&config.upstream_url, config.method)?;
    let upstream = HttpsUpstream::new(encoder, config.timeout)?;

    let mut dispatcher = Dispatcher::new(upstream, Arc::new(ResponseCache::new()));
    if !config.coalesce {
        dispatcher = dispatcher.without_coalescing();
    }
    let dispatcher = Arc::new(dispatcher);

    let udp = UdpTransport::bind(config.bind_addr).await?;

    info!(
        bind = %config.bind_addr,
        upstream = %config.upstream_url,
        method = %config.method,
        workers = config.pool.workers,
        queue_size = config.pool.queue_size,
        coalesce = config.coalesce,
        "DNS-over-HTTPS proxy listening"
    );

    let mut tasks = udp.start(dispatcher.clone(), config.pool);
    tasks.push(tokio::spawn(report_stats(dispatcher)));

    Err(supervise(tasks).await)
}

/// Wait for the first task to finish. None of them ends while the proxy is
/// healthy, so whichever does is reported and the rest are aborted.
async fn supervise(tasks: Vec<JoinHandle<()>>) -> ProxyError {
    if tasks.is_empty() {
        return ProxyError::TaskExited;
    }

    let (result, index, rest) = futures::future::select_all(tasks).await;
    for task in rest {
        task.abort();
    }

    match result {
        Ok(()) => {
            error!(task = index, "proxy task exited");
            ProxyError::TaskExited
        }
        Err(e) => {
            error!(task = index, error = %e, "proxy task failed");
            ProxyError::TaskFailed(e)
        }
    }
}

/// Log stats every minute.
async fn report_stats<U: Upstream, C: Clock + 'static>(dispatcher: Arc<Dispatcher<U, C>>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let stats = dispatcher.stats_snapshot_and_reset();
        info!(
            uptime_secs = stats.uptime_secs,
            cache = dispatcher.cache().len(),
            requests = stats.requests,
            forwarded = stats.forwarded,
            cached = stats.cached,
            coalesced = stats.coalesced,
            dropped = stats.dropped,
            rejected = stats.rejected,
            avg_response_ms = stats.avg_response_ms,
            "stats"
        );
    }
}
