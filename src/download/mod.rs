//! Conditional downloads of resource bundles through short-lived URLs.
//!
//! [`DownloadCoordinator::download`] resolves a bundle id to a signed storage URL, caching the
//! location until it nears expiry, then issues a conditional GET. Callers keep the returned
//! [`DownloadConditional`] and pass it back to skip unchanged bundles.
//!
//! # Example
//!
//! ```no_run
//! use cloud_connect::download::{DownloadCoordinator, DownloadResult};
//! use cloud_connect::ClusterClient;
//!
//! # async fn example(cluster: ClusterClient) -> Result<(), Box<dyn std::error::Error>> {
//! let downloads = DownloadCoordinator::builder(cluster.metadata_fetcher()).build();
//!
//! let mut body = Vec::new();
//! match downloads.download("config", &mut body, None).await? {
//!     DownloadResult::NotModified => {}
//!     DownloadResult::Downloaded { conditional, .. } => {
//!         println!("stored with etag {:?}", conditional.etag());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod conditional;
mod coordinator;
mod errors;
mod url_cache;

use crate::cluster::{ApiError, BundleDownload};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use conditional::DownloadConditional;
pub use coordinator::{DownloadCoordinator, DownloadCoordinatorBuilder, DownloadResult};
pub use errors::{DownloadError, StorageError};
pub use url_cache::{CacheEntry, UrlCache};

/// Future returned by a [`MetadataFetcher`].
pub type MetadataFuture =
    Pin<Box<dyn Future<Output = Result<BundleDownload, ApiError>> + Send + 'static>>;

/// Resolves a bundle id to its current download location.
pub type MetadataFetcher = Arc<dyn Fn(Arc<str>) -> MetadataFuture + Send + Sync + 'static>;
