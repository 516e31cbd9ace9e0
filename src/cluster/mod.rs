//! Cluster API: token exchange and bundle metadata.
//!
//! [`ClusterClient`] is a thin REST client. Its [`ClusterClient::token_fetcher`] and
//! [`ClusterClient::metadata_fetcher`] adapters plug it into
//! [`TokenCache`](crate::token::TokenCache) and
//! [`DownloadCoordinator`](crate::download::DownloadCoordinator).

mod client;
mod error;
mod models;

pub use client::ClusterClient;
pub use error::ApiError;
pub use models::{BootstrapConfig, Bundle, BundleDownload, GetBundlesResponse};
