use crate::cluster::ApiError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`TokenCache`](super::TokenCache).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The upstream token exchange failed; the error is passed through unchanged.
    #[error("error exchanging token: {0}")]
    Fetch(#[source] ApiError),

    /// The refresh slot or the upstream exchange did not complete within the wait ceiling.
    #[error("timed out after {0:?} waiting for token refresh")]
    Timeout(Duration),

    /// The freshly issued token expires before the requested minimum lifetime.
    ///
    /// This points at a minimum TTL larger than the issuer's maximum token lifetime.
    #[error("new token cannot satisfy requested TTL: short by {shortfall:?}")]
    InsufficientTtl {
        /// How much earlier than required the new token expires.
        shortfall: Duration,
    },
}

impl TokenError {
    /// Returns `true` if a later attempt may succeed without a configuration change.
    ///
    /// Timeouts and TTL shortfalls point at policy problems and are not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Timeout(_) | Self::InsufficientTtl { .. } => false,
        }
    }
}
