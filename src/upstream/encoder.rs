//! RFC 8484 request encoding.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};

use crate::error::ConfigError;

/// Media type of a wire-format DNS message.
pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Query-string parameter carrying the query for `GET`.
pub const DNS_PARAM: &str = "dns";

/// HTTP method used towards the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DohMethod {
    /// Query base64-encoded in the `dns` parameter.
    #[default]
    Get,
    /// Query sent as the request body.
    Post,
}

impl FromStr for DohMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Self::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Self::Post)
        } else {
            Err(ConfigError::UnsupportedMethod(s.to_string()))
        }
    }
}

impl fmt::Display for DohMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Builds upstream requests for one fixed URL and method.
#[derive(Debug, Clone)]
pub struct DohEncoder {
    url: Url,
    method: DohMethod,
}

impl DohEncoder {
    /// Validate the upstream URL. Only `http` and `https` are accepted.
    pub fn new(url: &str, method: DohMethod) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUpstreamUrl {
            url: url.to_string(),
            reason,
        };
        let url = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }

        Ok(Self { url, method })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> DohMethod {
        self.method
    }

    /// Build the request carrying `query`.
    pub fn encode(&self, query: &[u8]) -> Request {
        let mut request = match self.method {
            DohMethod::Get => {
                let mut url = self.url.clone();
                url.query_pairs_mut()
                    .append_pair(DNS_PARAM, &STANDARD.encode(query));
                Request::new(Method::GET, url)
            }
            DohMethod::Post => {
                let mut request = Request::new(Method::POST, self.url.clone());
                request
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from(query.len()));
                *request.body_mut() = Some(query.to_vec().into());
                request
            }
        };

        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static(DNS_MESSAGE_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DNS_MESSAGE_CONTENT_TYPE));

        request
    }
}
