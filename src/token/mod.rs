//! Bearer token cache.
//!
//! [`TokenCache`] hands out bearer tokens that stay valid for a caller-chosen minimum
//! lifetime. Refreshes happen lazily, at most one at a time, and concurrent callers that find
//! the cached token too short all wait on the same refresh.
//!
//! # Example
//!
//! ```no_run
//! use cloud_connect::token::{Credential, FetchFuture, TokenCache, TokenFetcher};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use time::OffsetDateTime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher: TokenFetcher = Arc::new(|_refresh_token: Arc<str>| -> FetchFuture {
//!     Box::pin(async {
//!         Ok(Credential::expiring_in(
//!             "bearer",
//!             OffsetDateTime::now_utc(),
//!             Duration::from_secs(3600),
//!         ))
//!     })
//! });
//!
//! let cache = TokenCache::new(fetcher, "refresh-token");
//! let bearer = cache.get_token(Duration::from_secs(300)).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod errors;
mod types;

pub use cache::TokenCache;
pub use errors::TokenError;
pub use types::{Clock, Credential, FetchFuture, TokenFetcher};

pub(crate) use types::{checked_offset, saturating_offset, system_clock};
