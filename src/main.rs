use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dohproxy::error::ConfigError;
use dohproxy::proxy::{self, ProxyConfig};
use dohproxy::transport::PoolConfig;
use dohproxy::upstream::DohMethod;

#[derive(Parser)]
#[command(name = "dohproxy")]
#[command(about = "Caching DNS-over-HTTPS forwarding proxy", long_about = None)]
struct Args {
    /// DoH server receiving the forwarded queries
    #[arg(short, long, visible_alias = "dohserver", default_value = "https://cloudflare-dns.com/dns-query")]
    upstream: String,

    /// Bind address
    #[arg(short, long, visible_alias = "host", default_value = "0.0.0.0")]
    bind: String,

    /// Local port to listen on
    #[arg(short, long, default_value = "5553")]
    port: u16,

    /// HTTP method used towards the DoH server (GET or POST)
    #[arg(short, long, visible_alias = "http-method", default_value = "GET")]
    method: String,

    /// Number of queries resolved concurrently
    #[arg(long, default_value = "256")]
    workers: usize,

    /// Queries allowed to wait for a worker before new ones are rejected
    #[arg(long, default_value = "1024")]
    queue_size: usize,

    /// Upstream request timeout in seconds (transport default if unset)
    #[arg(long)]
    timeout: Option<u64>,

    /// Send every cache miss upstream, even if an identical one is pending
    #[arg(long)]
    no_coalesce: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind.clone()))?;

        Ok(ProxyConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            upstream_url: self.upstream,
            method: self.method.parse()?,
            timeout: self.timeout.map(Duration::from_secs),
            pool: PoolConfig {
                workers: self.workers,
                queue_size: self.queue_size,
            },
            coalesce: !self.no_coalesce,
        })
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = args.into_config().context("invalid configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    rt.block_on(proxy::run(config))
        .context("DNS-over-HTTPS proxy failed")
}
