#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Client for a cloud-managed control channel.
//!
//! A long-lived API refresh token is exchanged for short-lived bearer tokens, which authorize
//! calls to the cluster API and open a streaming subscription that announces configuration
//! changes. Resource bundles are fetched through short-lived signed URLs with HTTP
//! conditional requests.
//!
//! The building blocks:
//!
//! - [`TokenCache`]: concurrency-safe bearer token cache; at most one refresh in flight.
//! - [`Broadcaster`]: ordered fan-out of events to any number of subscribers.
//! - [`SubscriptionEngine`]: keeps the update stream alive, reconnecting with backoff.
//! - [`DownloadCoordinator`]: TTL-cached download URLs and `ETag`/`Last-Modified` downloads.
//! - [`ControlClient`]: wires all of the above from a [`ClientConfig`].
//!
//! ## Example
//!
//! ```no_run
//! use cloud_connect::download::DownloadResult;
//! use cloud_connect::{ClientConfig, ControlClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ControlClient::new(
//!     ClientConfig::builder()
//!         .cluster_api_endpoint("https://console.example.com/cluster/v1")
//!         .connect_api_endpoint("https://connect.example.com")
//!         .api_token("refresh-token")
//!         .build()?,
//! )?;
//!
//! let mut bundle = Vec::new();
//! if let DownloadResult::Downloaded { conditional, .. } =
//!     client.download_bundle("config", &mut bundle, None).await?
//! {
//!     // Pass `conditional` back next time to skip unchanged bundles.
//!     let next = client.download_bundle("config", &mut bundle, Some(&conditional)).await?;
//!     assert_eq!(next, DownloadResult::NotModified);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): internal diagnostics through the `log` crate.
//! - **`tracing`**: internal diagnostics through `tracing` events instead.

mod observability;
mod prelude;

pub mod broadcast;
pub mod client;
pub mod cluster;
pub mod config;
pub mod connect;
pub mod constants;
pub mod download;
pub mod endpoint;
pub mod token;

// -----------------------
// Re-exports
// -----------------------

pub use crate::{
    broadcast::{BroadcastConfig, BroadcastError, Broadcaster, Subscription},
    client::ControlClient,
    cluster::{ApiError, ClusterClient},
    config::{ClientConfig, ClientConfigBuilder, ConfigError},
    connect::{
        ConnectError, ConnectionState, DispatchEvent, ReconnectConfig, ReconnectPolicy,
        SubscriptionEngine, SubscriptionEngineBuilder, WatchHandlers,
    },
    download::{DownloadConditional, DownloadCoordinator, DownloadError, DownloadResult},
    endpoint::{Endpoint, EndpointError},
    token::{Credential, TokenCache, TokenError},
};
