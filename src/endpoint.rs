//! Control-channel endpoint parsing and validation.
//!
//! The connect API is reached over gRPC on a plain `http://` or `https://` URL. The scheme
//! decides whether TLS is required, and a missing port falls back to the scheme default.

use std::fmt;

use thiserror::Error;
use url::Url;

const HTTP_SCHEME: &str = "http";
const HTTPS_SCHEME: &str = "https";

/// Parsed control-channel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    require_tls: bool,
}

/// Errors returned by [`Endpoint::parse`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The input could not be parsed as a valid URL.
    #[error("endpoint is not a valid URL")]
    Parse(#[from] url::ParseError),

    /// The URL scheme is not supported.
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// The URL has no host.
    #[error("endpoint must include a host")]
    MissingHost,

    /// A path other than `/` was given.
    #[error("endpoint path is not supported: {0}")]
    UnexpectedPath(String),
}

impl Endpoint {
    /// Parses an `http://` or `https://` endpoint.
    ///
    /// ## Errors
    ///
    /// Returns an [`EndpointError`] if the input is not a URL, uses another scheme,
    /// has no host, or carries a path.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(input)?;

        let require_tls = match url.scheme() {
            HTTP_SCHEME => false,
            HTTPS_SCHEME => true,
            other => return Err(EndpointError::UnsupportedScheme(other.to_owned())),
        };

        let path = url.path();
        if !path.is_empty() && path != "/" {
            return Err(EndpointError::UnexpectedPath(path.to_owned()));
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => return Err(EndpointError::MissingHost),
        };

        // `port()` hides explicit default ports; fall back to the scheme default either way.
        let port = url
            .port_or_known_default()
            .unwrap_or(if require_tls { 443 } else { 80 });

        Ok(Self {
            host,
            port,
            require_tls,
        })
    }

    /// Host name or address of the endpoint.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port of the endpoint.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether the connection must use TLS (`https` scheme).
    pub const fn require_tls(&self) -> bool {
        self.require_tls
    }

    /// Connection target in gRPC naming form, e.g. `dns:localhost:8721`.
    pub fn connection_uri(&self) -> String {
        format!("dns:{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.require_tls {
            HTTPS_SCHEME
        } else {
            HTTP_SCHEME
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}
