use crate::cluster::ApiError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use time::{OffsetDateTime, PrimitiveDateTime};
use zeroize::Zeroizing;

/// Bearer token together with the instant it stops being valid.
///
/// A credential is never mutated; a refresh replaces it as a whole.
#[derive(Clone)]
pub struct Credential {
    bearer: Zeroizing<String>,
    expires_at: OffsetDateTime,
}

impl Credential {
    /// Creates a credential expiring at `expires_at`.
    pub fn new(bearer: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            bearer: Zeroizing::new(bearer.into()),
            expires_at,
        }
    }

    /// Creates a credential that expires `ttl` after `issued_at`.
    ///
    /// An expiry past the representable range is clamped to the latest representable instant.
    pub fn expiring_in(bearer: impl Into<String>, issued_at: OffsetDateTime, ttl: Duration) -> Self {
        Self::new(bearer, saturating_offset(issued_at, ttl))
    }

    /// The bearer token.
    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    /// Instant at which the token expires.
    pub const fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Returns `true` if the token is still valid strictly after `instant`.
    pub fn expires_after(&self, instant: OffsetDateTime) -> bool {
        self.expires_at > instant
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bearer", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Future returned by a [`TokenFetcher`].
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Credential, ApiError>> + Send + 'static>>;

/// Exchanges a refresh token for a fresh [`Credential`].
pub type TokenFetcher = Arc<dyn Fn(Arc<str>) -> FetchFuture + Send + Sync + 'static>;

/// Source of the current wall-clock time; replaceable in tests.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync + 'static>;

pub(crate) fn system_clock() -> Clock {
    Arc::new(OffsetDateTime::now_utc)
}

/// Latest instant an expiry may be clamped to.
pub(crate) const LATEST_INSTANT: OffsetDateTime = PrimitiveDateTime::MAX.assume_utc();

/// `at + offset`, or `None` if the result is out of range.
pub(crate) fn checked_offset(at: OffsetDateTime, offset: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(offset)
        .ok()
        .and_then(|offset| at.checked_add(offset))
}

/// `at + offset`, clamped to [`LATEST_INSTANT`].
pub(crate) fn saturating_offset(at: OffsetDateTime, offset: Duration) -> OffsetDateTime {
    checked_offset(at, offset).unwrap_or(LATEST_INSTANT)
}
