//! High-level client wiring the cluster API, token cache, downloads and update stream.

use crate::cluster::{ApiError, BootstrapConfig, ClusterClient, GetBundlesResponse};
use crate::config::{ClientConfig, ConfigError};
use crate::connect::{StreamFactory, SubscriptionEngine, SubscriptionEngineBuilder};
use crate::download::{DownloadConditional, DownloadCoordinator, DownloadError, DownloadResult};
use crate::endpoint::Endpoint;
use crate::token::TokenCache;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Client for a cloud-managed control channel.
///
/// One instance owns one token cache, one download URL cache and the HTTP client they share.
/// Nothing is process-global; create as many clients as needed.
///
/// # Example
///
/// ```no_run
/// use cloud_connect::{ClientConfig, ControlClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ControlClient::new(
///     ClientConfig::builder()
///         .cluster_api_endpoint("https://console.example.com/cluster/v1")
///         .connect_api_endpoint("https://connect.example.com")
///         .api_token(std::env::var("API_TOKEN")?)
///         .build()?,
/// )?;
///
/// let bootstrap = client.get_bootstrap_config().await?;
/// println!("{bootstrap:?}");
/// # Ok(())
/// # }
/// ```
pub struct ControlClient {
    config: ClientConfig,
    cluster: ClusterClient,
    tokens: Arc<TokenCache>,
    downloads: DownloadCoordinator,
}

impl Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("config", &self.config)
            .field("cluster", &self.cluster)
            .field("downloads", &self.downloads)
            .finish_non_exhaustive()
    }
}

impl ControlClient {
    /// Creates a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidClusterApiEndpoint`] if the cluster API client cannot be
    /// created for the configured endpoint.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let http = config.http_client().cloned().unwrap_or_default();
        let endpoint = config.cluster_api_endpoint().as_str();

        let unauthenticated = ClusterClient::new(endpoint, http.clone()).map_err(|e| {
            ConfigError::InvalidClusterApiEndpoint {
                endpoint: endpoint.to_owned(),
                reason: e.to_string(),
            }
        })?;

        let tokens = Arc::new(
            TokenCache::new(unauthenticated.token_fetcher(), config.api_token())
                .with_max_lock_wait(config.token_lock_wait()),
        );
        let cluster = unauthenticated.with_token_cache(Arc::clone(&tokens));

        let downloads = DownloadCoordinator::builder(cluster.metadata_fetcher())
            .http_client(http)
            .url_min_ttl(config.download_url_min_ttl())
            .build();

        Ok(Self {
            config,
            cluster,
            tokens,
            downloads,
        })
    }

    /// The configuration this client was built from.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Endpoint the update stream should be opened against.
    pub const fn connect_endpoint(&self) -> &Endpoint {
        self.config.connect_api_endpoint()
    }

    /// The authorized cluster API client.
    pub const fn cluster(&self) -> &ClusterClient {
        &self.cluster
    }

    /// The token cache shared by every call this client makes.
    pub const fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// The bundle download coordinator.
    pub const fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    /// Fetches the cluster bootstrap configuration.
    ///
    /// # Errors
    ///
    /// See [`ClusterClient::get_bootstrap_config`].
    pub async fn get_bootstrap_config(&self) -> Result<BootstrapConfig, ApiError> {
        self.cluster.get_bootstrap_config().await
    }

    /// Lists the resource bundles assigned to the cluster.
    ///
    /// # Errors
    ///
    /// See [`ClusterClient::get_bundles`].
    pub async fn get_bundles(&self) -> Result<GetBundlesResponse, ApiError> {
        self.cluster.get_bundles().await
    }

    /// Downloads bundle `id` into `dst`, conditionally on `current`.
    ///
    /// # Errors
    ///
    /// See [`DownloadCoordinator::download`].
    pub async fn download_bundle<W>(
        &self,
        id: &str,
        dst: &mut W,
        current: Option<&DownloadConditional>,
    ) -> Result<DownloadResult, DownloadError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.downloads.download(id, dst, current).await
    }

    /// Returns a builder for an update-stream engine authenticated by this client.
    pub fn subscription_engine(&self, open_stream: StreamFactory) -> SubscriptionEngineBuilder {
        SubscriptionEngine::builder(Arc::clone(&self.tokens), open_stream)
    }

    /// Builds and starts an update-stream engine with default settings.
    ///
    /// Watchers registered on the returned engine may miss the first `Connected` event; use
    /// [`ControlClient::subscription_engine`] and register them before starting to avoid that.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn connect(&self, open_stream: StreamFactory) -> SubscriptionEngine {
        let engine = self.subscription_engine(open_stream).build();
        engine.start();
        engine
    }
}
