//! DNS-over-HTTPS client (RFC 8484).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use super::encoder::DohEncoder;
use super::{Upstream, UpstreamResponse};
use crate::error::{ConfigError, UpstreamError};

/// Sends encoded queries to a single DoH endpoint.
///
/// The inner [`Client`] pools connections and is shared by all dispatches.
pub struct HttpsUpstream {
    client: Client,
    encoder: DohEncoder,
}

impl HttpsUpstream {
    /// Build the HTTP client. `timeout` bounds the whole request; `None`
    /// leaves the transport defaults in place.
    pub fn new(encoder: DohEncoder, timeout: Option<Duration>) -> Result<Self, ConfigError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(16);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ConfigError::HttpClient)?;

        Ok(Self { client, encoder })
    }
}

impl Upstream for HttpsUpstream {
    async fn exchange(&self, query: &[u8]) -> Result<UpstreamResponse, UpstreamError> {
        let request = self.encoder.encode(query);
        debug!(
            url = %self.encoder.url(),
            method = %self.encoder.method(),
            message_len = query.len(),
            "Sending DoH query"
        );

        let response = self
            .client
            .execute(request)
            .await
            .map_err(UpstreamError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(UpstreamError::Status(status));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(UpstreamError::Body)?;

        debug!(response_len = body.len(), "DoH response received");

        Ok(UpstreamResponse { body, headers })
    }
}
