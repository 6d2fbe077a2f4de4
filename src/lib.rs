//! dohproxy - A caching DNS-over-HTTPS forwarding proxy.
//!
//! Accepts plain DNS queries over UDP, forwards cache misses to an
//! RFC 8484 upstream and relays the answers back.

pub mod cache;
pub mod cache_control;
pub mod dispatcher;
pub mod dns;
pub mod error;
pub mod proxy;
pub mod singleflight;
pub mod stats;
pub mod transport;
pub mod upstream;

pub use cache::ResponseCache;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{CacheError, ConfigError, ProxyError, UpstreamError};
pub use proxy::{ProxyConfig, run};
