//! Client configuration.

use crate::constants::{DEFAULT_DOWNLOAD_URL_MIN_TTL, MAX_TOKEN_LOCK_WAIT};
use crate::endpoint::{Endpoint, EndpointError};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

/// Errors returned by [`ClientConfigBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// No cluster API endpoint was set.
    #[error("cluster API endpoint is required")]
    MissingClusterApiEndpoint,

    /// No connect API endpoint was set.
    #[error("connect API endpoint is required")]
    MissingConnectApiEndpoint,

    /// No API token was set.
    #[error("API token is required")]
    MissingApiToken,

    /// The cluster API endpoint is not a usable base URL.
    #[error("invalid cluster API endpoint {endpoint:?}: {reason}")]
    InvalidClusterApiEndpoint {
        /// The rejected value.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The connect API endpoint is invalid.
    #[error("invalid connect API endpoint: {0}")]
    InvalidConnectApiEndpoint(#[from] EndpointError),
}

/// Validated configuration for a [`ControlClient`](crate::ControlClient).
#[derive(Clone)]
pub struct ClientConfig {
    cluster_api_endpoint: Url,
    connect_api_endpoint: Endpoint,
    api_token: Zeroizing<String>,
    http_client: Option<reqwest::Client>,
    download_url_min_ttl: Duration,
    token_lock_wait: Duration,
}

impl Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cluster_api_endpoint", &self.cluster_api_endpoint.as_str())
            .field("connect_api_endpoint", &self.connect_api_endpoint)
            .field("api_token", &"<redacted>")
            .field("http_client", &self.http_client.as_ref().map(|_| "<Client>"))
            .field("download_url_min_ttl", &self.download_url_min_ttl)
            .field("token_lock_wait", &self.token_lock_wait)
            .finish()
    }
}

impl ClientConfig {
    /// Returns a new [`ClientConfigBuilder`].
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Base URL of the cluster API.
    pub const fn cluster_api_endpoint(&self) -> &Url {
        &self.cluster_api_endpoint
    }

    /// Endpoint of the connect API serving the update stream.
    pub const fn connect_api_endpoint(&self) -> &Endpoint {
        &self.connect_api_endpoint
    }

    /// The long-lived API refresh token.
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// HTTP client to use, if one was supplied.
    pub const fn http_client(&self) -> Option<&reqwest::Client> {
        self.http_client.as_ref()
    }

    /// Minimum remaining lifetime of a cached bundle download URL.
    pub const fn download_url_min_ttl(&self) -> Duration {
        self.download_url_min_ttl
    }

    /// Upper bound on how long a token refresh may take.
    pub const fn token_lock_wait(&self) -> Duration {
        self.token_lock_wait
    }
}

/// Builder for [`ClientConfig`].
///
/// # Example
///
/// ```
/// use cloud_connect::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .cluster_api_endpoint("https://console.example.com/cluster/v1")
///     .connect_api_endpoint("https://connect.example.com")
///     .api_token("refresh-token")
///     .build()
///     .unwrap();
/// assert_eq!(config.connect_api_endpoint().port(), 443);
/// ```
#[derive(Default)]
pub struct ClientConfigBuilder {
    cluster_api_endpoint: Option<String>,
    connect_api_endpoint: Option<String>,
    api_token: Option<Zeroizing<String>>,
    http_client: Option<reqwest::Client>,
    download_url_min_ttl: Option<Duration>,
    token_lock_wait: Option<Duration>,
}

impl Debug for ClientConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfigBuilder")
            .field("cluster_api_endpoint", &self.cluster_api_endpoint)
            .field("connect_api_endpoint", &self.connect_api_endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("http_client", &self.http_client.as_ref().map(|_| "<Client>"))
            .field("download_url_min_ttl", &self.download_url_min_ttl)
            .field("token_lock_wait", &self.token_lock_wait)
            .finish()
    }
}

impl ClientConfigBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster API base URL.
    #[must_use]
    pub fn cluster_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.cluster_api_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the connect API endpoint (`http://` or `https://`, no path).
    #[must_use]
    pub fn connect_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.connect_api_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the API refresh token.
    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(Zeroizing::new(token.into()));
        self
    }

    /// Uses `client` for cluster API and bundle storage requests.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the minimum remaining lifetime of a cached bundle download URL. Default is 60 seconds.
    #[must_use]
    pub const fn download_url_min_ttl(mut self, min_ttl: Duration) -> Self {
        self.download_url_min_ttl = Some(min_ttl);
        self
    }

    /// Sets the upper bound on how long a token refresh may take. Default is 30 seconds.
    #[must_use]
    pub const fn token_lock_wait(mut self, wait: Duration) -> Self {
        self.token_lock_wait = Some(wait);
        self
    }

    /// Validates the settings and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required setting is missing or empty, or an endpoint
    /// is invalid.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let cluster = self
            .cluster_api_endpoint
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingClusterApiEndpoint)?;
        let connect = self
            .connect_api_endpoint
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingConnectApiEndpoint)?;
        let api_token = self
            .api_token
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingApiToken)?;

        let cluster_api_endpoint = parse_base_url(&cluster)?;
        let connect_api_endpoint = Endpoint::parse(&connect)?;

        Ok(ClientConfig {
            cluster_api_endpoint,
            connect_api_endpoint,
            api_token,
            http_client: self.http_client,
            download_url_min_ttl: self
                .download_url_min_ttl
                .unwrap_or(DEFAULT_DOWNLOAD_URL_MIN_TTL),
            token_lock_wait: self.token_lock_wait.unwrap_or(MAX_TOKEN_LOCK_WAIT),
        })
    }
}

fn parse_base_url(endpoint: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidClusterApiEndpoint {
        endpoint: endpoint.to_owned(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL".to_owned()));
    }
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn complete() -> ClientConfigBuilder {
        ClientConfig::builder()
            .cluster_api_endpoint("https://console.example.com/cluster/v1")
            .connect_api_endpoint("https://connect.example.com:8443")
            .api_token("refresh-token")
    }

    #[test]
    fn build_applies_defaults() {
        let config = complete().build().unwrap();
        assert_eq!(
            config.cluster_api_endpoint().as_str(),
            "https://console.example.com/cluster/v1"
        );
        assert_eq!(
            config.connect_api_endpoint().connection_uri(),
            "dns:connect.example.com:8443"
        );
        assert_eq!(config.api_token(), "refresh-token");
        assert_eq!(config.download_url_min_ttl(), DEFAULT_DOWNLOAD_URL_MIN_TTL);
        assert_eq!(config.token_lock_wait(), MAX_TOKEN_LOCK_WAIT);
        assert!(config.http_client().is_none());
    }

    #[test]
    fn build_requires_every_setting() {
        assert_eq!(
            ClientConfig::builder().build().unwrap_err(),
            ConfigError::MissingClusterApiEndpoint
        );
        assert_eq!(
            complete().connect_api_endpoint("").build().unwrap_err(),
            ConfigError::MissingConnectApiEndpoint
        );
        assert_eq!(
            complete().api_token("").build().unwrap_err(),
            ConfigError::MissingApiToken
        );
    }

    #[test]
    fn build_rejects_bad_endpoints() {
        assert!(matches!(
            complete().cluster_api_endpoint("ftp://x").build(),
            Err(ConfigError::InvalidClusterApiEndpoint { .. })
        ));
        assert!(matches!(
            complete().connect_api_endpoint("https://connect.example.com/v1").build(),
            Err(ConfigError::InvalidConnectApiEndpoint(
                EndpointError::UnexpectedPath(_)
            ))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let config = complete().build().unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("refresh-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
