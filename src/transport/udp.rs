//! UDP transport for DNS queries.
//!
//! A single listener task reads datagrams and queues them for the worker
//! pool; workers answer on the same socket, addressed to the original
//! sender. Answers may leave in any order.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::MAX_DNS_PACKET_SIZE;
use super::pool::{self, Job, PoolConfig};
use crate::cache::Clock;
use crate::dispatcher::Dispatcher;
use crate::dns::HEADER_LEN;
use crate::error::ProxyError;
use crate::stats::Stats;
use crate::upstream::Upstream;

/// UDP transport for the DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket. Failure here is fatal for the proxy.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProxyError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the worker pool and the receive loop.
    ///
    /// Returns the handles of every spawned task; the receive loop only
    /// finishes once the worker pool is gone.
    pub fn start<U, C>(self, dispatcher: Arc<Dispatcher<U, C>>, config: PoolConfig) -> Vec<JoinHandle<()>>
    where
        U: Upstream,
        C: Clock + 'static,
    {
        let (queue, mut handles) = pool::spawn_workers(self.socket.clone(), dispatcher.clone(), config);
        handles.push(tokio::spawn(run(self.socket, queue, dispatcher)));
        handles
    }
}

/// Receive loop: read a datagram, queue it, repeat.
async fn run<U, C>(socket: Arc<UdpSocket>, queue: mpsc::Sender<Job>, dispatcher: Arc<Dispatcher<U, C>>)
where
    U: Upstream,
    C: Clock + 'static,
{
    let stats: &Stats = dispatcher.stats();
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, client) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < HEADER_LEN {
            debug!(client = %client, len, "ignoring datagram shorter than a DNS header");
            continue;
        }

        let job = Job {
            query: buf[..len].to_vec(),
            client,
        };
        match queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                stats.record_rejected();
                debug!(client = %job.client, "worker queue full, rejecting query");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("worker pool stopped, closing UDP listener");
                return;
            }
        }
    }
}
