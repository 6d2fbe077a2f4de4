//! Bounded worker pool between the UDP listener and the dispatcher.
//!
//! The listener enqueues datagrams without waiting; when the queue is full
//! the newest datagram is rejected and the client's own retry covers it.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::cache::Clock;
use crate::dispatcher::Dispatcher;
use crate::upstream::Upstream;

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of concurrently running dispatches.
    pub workers: usize,
    /// Datagrams that may wait for a free worker.
    pub queue_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 256,
            queue_size: 1024,
        }
    }
}

/// A received query waiting for a worker.
#[derive(Debug)]
pub struct Job {
    pub query: Vec<u8>,
    pub client: SocketAddr,
}

/// Spawn the workers. Returns the queue sender and the worker handles.
pub fn spawn_workers<U, C>(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher<U, C>>,
    config: PoolConfig,
) -> (mpsc::Sender<Job>, Vec<JoinHandle<()>>)
where
    U: Upstream,
    C: Clock + 'static,
{
    let (tx, rx) = mpsc::channel(config.queue_size.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let handles = (0..config.workers.max(1))
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                rx.clone(),
                socket.clone(),
                dispatcher.clone(),
            ))
        })
        .collect();

    (tx, handles)
}

async fn run_worker<U, C>(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher<U, C>>,
) where
    U: Upstream,
    C: Clock + 'static,
{
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            trace!(worker = id, "queue closed, worker exiting");
            return;
        };
        let client = job.client;
        // A panicking dispatch loses its own query, never the worker.
        if AssertUnwindSafe(handle_job(&socket, &dispatcher, job))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(worker = id, client = %client, "query handler panicked, dropping query");
            dispatcher.stats().record_dropped();
        }
    }
}

/// Dispatch one query and send the answer, if any, to the client.
async fn handle_job<U, C>(socket: &UdpSocket, dispatcher: &Dispatcher<U, C>, job: Job)
where
    U: Upstream,
    C: Clock,
{
    let outcome = dispatcher.dispatch(&job.query).await;
    let Some(reply) = outcome.reply() else {
        return;
    };

    if let Err(e) = socket.send_to(reply, job.client).await {
        warn!(client = %job.client, error = %e, "UDP response error");
    }
}
