//! DNS-over-HTTPS upstream.
//!
//! [`encoder`] turns a raw query into an HTTP request, [`https`] sends it.
//! The dispatcher only sees the [`Upstream`] trait.

pub mod encoder;
pub mod https;

use std::future::Future;

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::UpstreamError;

pub use encoder::{DohEncoder, DohMethod};
pub use https::HttpsUpstream;

/// A successful upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// DNS message in wire format, ID echoed from the query.
    pub body: Bytes,
    pub headers: HeaderMap,
}

/// Something that can answer a raw DNS query.
pub trait Upstream: Send + Sync + 'static {
    fn exchange(&self, query: &[u8]) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}
