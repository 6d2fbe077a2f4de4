//! Transport layer for the DNS proxy.
//!
//! Receives DNS queries from clients over UDP, hands them to a bounded pool
//! of workers running the dispatcher, and writes the answers back.

pub mod pool;
pub mod udp;

pub use pool::PoolConfig;
pub use udp::UdpTransport;

/// Largest UDP payload accepted from clients (no EDNS(0)).
pub const MAX_DNS_PACKET_SIZE: usize = 512;
