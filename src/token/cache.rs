use super::errors::TokenError;
use super::types::{saturating_offset, system_clock, Clock, Credential, TokenFetcher};
use crate::constants::MAX_TOKEN_LOCK_WAIT;
use crate::prelude::{debug, warn};
use arc_swap::ArcSwapOption;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

/// Concurrency-safe cache for one bearer token.
///
/// Readers take the lock-free fast path while the cached token satisfies their minimum
/// lifetime. When it does not, callers queue for a single refresh slot; the first one through
/// performs the upstream exchange and everyone behind it reuses the result.
///
/// The cache is an ordinary value: share it by wrapping it in an [`Arc`].
pub struct TokenCache {
    // Last issued credential; replaced as a whole on refresh.
    current: ArcSwapOption<Credential>,

    // At most one upstream exchange in flight.
    refresh_slot: Mutex<()>,

    refresh_token: Arc<str>,
    fetcher: TokenFetcher,
    clock: Clock,
    max_lock_wait: Duration,
}

impl Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("current", &self.current.load_full())
            .field("refresh_token", &"<redacted>")
            .field("fetcher", &"<TokenFetcher>")
            .field("max_lock_wait", &self.max_lock_wait)
            .finish()
    }
}

impl TokenCache {
    /// Creates an empty cache that exchanges `refresh_token` through `fetcher`.
    pub fn new(fetcher: TokenFetcher, refresh_token: impl Into<String>) -> Self {
        let refresh_token: String = refresh_token.into();
        Self {
            current: ArcSwapOption::empty(),
            refresh_slot: Mutex::new(()),
            refresh_token: Arc::from(refresh_token),
            fetcher,
            clock: system_clock(),
            max_lock_wait: MAX_TOKEN_LOCK_WAIT,
        }
    }

    /// Replaces the wall clock used for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides the ceiling on waiting for the refresh slot plus the upstream exchange.
    #[must_use]
    pub fn with_max_lock_wait(mut self, max_lock_wait: Duration) -> Self {
        self.max_lock_wait = max_lock_wait;
        self
    }

    /// Returns the cached credential, if any, regardless of its remaining lifetime.
    pub fn cached(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    /// Returns a bearer token valid for at least `min_ttl` from now.
    ///
    /// Dropping the returned future abandons only this caller's wait; a refresh already
    /// running on behalf of other callers is unaffected unless this caller was the one
    /// performing it, in which case the next waiter takes over.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Fetch`] if the upstream exchange fails.
    /// - [`TokenError::Timeout`] if the refresh does not finish within the wait ceiling.
    /// - [`TokenError::InsufficientTtl`] if even a fresh token expires too soon. A `min_ttl`
    ///   reaching past the representable calendar always ends here.
    pub async fn get_token(&self, min_ttl: Duration) -> Result<String, TokenError> {
        let min_expiration = saturating_offset((self.clock)(), min_ttl);

        if let Some(credential) = self.current.load_full() {
            if credential.expires_after(min_expiration) {
                return Ok(credential.bearer().to_owned());
            }
        }

        self.refresh(min_expiration).await
    }

    async fn refresh(&self, min_expiration: OffsetDateTime) -> Result<String, TokenError> {
        let deadline = Instant::now() + self.max_lock_wait;

        let _slot = timeout_at(deadline, self.refresh_slot.lock())
            .await
            .map_err(|_| TokenError::Timeout(self.max_lock_wait))?;

        // Another caller may have refreshed while we were queued.
        if let Some(credential) = self.current.load_full() {
            if credential.expires_after(min_expiration) {
                return Ok(credential.bearer().to_owned());
            }
        }

        debug!("Refreshing bearer token");
        let fetch = (self.fetcher)(Arc::clone(&self.refresh_token));
        let credential = match timeout_at(deadline, fetch).await {
            Ok(Ok(c)) => Arc::new(c),
            Ok(Err(e)) => {
                warn!("Token exchange failed: error={}", e);
                return Err(TokenError::Fetch(e));
            }
            Err(_) => {
                warn!(
                    "Token exchange timed out: timeout_ms={}",
                    self.max_lock_wait.as_millis()
                );
                return Err(TokenError::Timeout(self.max_lock_wait));
            }
        };

        self.current.store(Some(Arc::clone(&credential)));

        if !credential.expires_after(min_expiration) {
            let shortfall = (min_expiration - credential.expires_at()).unsigned_abs();
            warn!(
                "New token cannot satisfy requested TTL: shortfall_ms={}",
                shortfall.as_millis()
            );
            return Err(TokenError::InsufficientTtl { shortfall });
        }

        Ok(credential.bearer().to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::ApiError;
    use crate::token::FetchFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const HOUR: Duration = Duration::from_secs(3600);

    struct FakeClock {
        now: StdMutex<OffsetDateTime>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: StdMutex::new(OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            })
        }

        fn now(&self) -> OffsetDateTime {
            *self.now.lock().unwrap()
        }

        fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }

        fn as_clock(self: &Arc<Self>) -> Clock {
            let me = Arc::clone(self);
            Arc::new(move || me.now())
        }
    }

    /// Fetcher issuing `token-N` valid for `ttl`, after sleeping `delay`.
    fn counting_fetcher(
        clock: &Arc<FakeClock>,
        ttl: Duration,
        delay: Duration,
    ) -> (TokenFetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let clock = Arc::clone(clock);
        let fetcher: TokenFetcher = Arc::new(move |refresh: Arc<str>| -> FetchFuture {
            let n = calls_in.fetch_add(1, Ordering::SeqCst) + 1;
            let issued = clock.now();
            Box::pin(async move {
                assert_eq!(&*refresh, "refresh-token");
                tokio::time::sleep(delay).await;
                Ok(Credential::expiring_in(format!("token-{n}"), issued, ttl))
            })
        });
        (fetcher, calls)
    }

    #[tokio::test]
    async fn fast_path_reuses_cached_token() {
        let clock = FakeClock::new();
        let (fetcher, calls) = counting_fetcher(&clock, HOUR, Duration::ZERO);
        let cache = TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock());

        let first = cache.get_token(Duration::from_secs(60)).await.unwrap();
        let second = cache.get_token(Duration::from_secs(60)).await.unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_when_remaining_ttl_is_too_short() {
        let clock = FakeClock::new();
        let (fetcher, calls) = counting_fetcher(&clock, HOUR, Duration::ZERO);
        let cache = TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock());

        assert_eq!(cache.get_token(Duration::from_secs(60)).await.unwrap(), "token-1");

        // 30 minutes left, caller needs 45.
        clock.advance(Duration::from_secs(30 * 60));
        let token = cache.get_token(Duration::from_secs(45 * 60)).await.unwrap();

        assert_eq!(token, "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let cached = cache.cached().unwrap();
        assert!(cached.expires_after(clock.now() + Duration::from_secs(45 * 60)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_are_coalesced() {
        let clock = FakeClock::new();
        let (fetcher, calls) = counting_fetcher(&clock, HOUR, Duration::from_millis(50));
        let cache = Arc::new(TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get_token(Duration::from_secs(60)).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_lived_token_fails_with_insufficient_ttl() {
        let clock = FakeClock::new();
        let (fetcher, _calls) = counting_fetcher(&clock, Duration::from_secs(1), Duration::ZERO);
        let cache = TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock());

        let err = cache.get_token(HOUR).await.unwrap_err();

        match err {
            TokenError::InsufficientTtl { shortfall } => {
                assert_eq!(shortfall, HOUR - Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!TokenError::InsufficientTtl {
            shortfall: Duration::ZERO
        }
        .is_retryable());
        // The credential is still stored for callers with smaller requirements.
        assert!(cache.cached().is_some());
    }

    #[tokio::test]
    async fn min_ttl_beyond_the_calendar_is_insufficient() {
        let clock = FakeClock::new();
        let (fetcher, calls) = counting_fetcher(&clock, HOUR, Duration::ZERO);
        let cache = TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock());

        assert_eq!(cache.get_token(Duration::from_secs(60)).await.unwrap(), "token-1");

        for min_ttl in [Duration::MAX, Duration::from_secs(99_999_999_999_999)] {
            let err = cache.get_token(min_ttl).await.unwrap_err();
            assert!(matches!(err, TokenError::InsufficientTtl { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Ordinary callers are unaffected.
        assert_eq!(cache.get_token(Duration::from_secs(60)).await.unwrap(), "token-3");
    }

    #[tokio::test]
    async fn fetch_error_is_propagated_and_slot_released() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let fetcher: TokenFetcher = Arc::new(move |_: Arc<str>| -> FetchFuture {
            calls_in.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(ApiError::BadRequest {
                    message: "invalid refresh token".to_owned(),
                    request_id: None,
                })
            })
        });
        let cache = TokenCache::new(fetcher, "refresh-token");

        for _ in 0..2 {
            let err = cache.get_token(Duration::from_secs(60)).await.unwrap_err();
            assert!(matches!(err, TokenError::Fetch(ApiError::BadRequest { .. })));
            assert!(!err.is_retryable());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out() {
        let fetcher: TokenFetcher = Arc::new(|_: Arc<str>| -> FetchFuture { Box::pin(std::future::pending()) });
        let cache = TokenCache::new(fetcher, "refresh-token");

        let started = Instant::now();
        let err = cache.get_token(Duration::from_secs(60)).await.unwrap_err();

        assert!(matches!(err, TokenError::Timeout(d) if d == MAX_TOKEN_LOCK_WAIT));
        assert!(started.elapsed() >= MAX_TOKEN_LOCK_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_does_not_disturb_refresh() {
        let clock = FakeClock::new();
        let (fetcher, calls) = counting_fetcher(&clock, HOUR, Duration::from_millis(100));
        let cache = Arc::new(TokenCache::new(fetcher, "refresh-token").with_clock(clock.as_clock()));

        let refresher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_token(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_token(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(refresher.await.unwrap().unwrap(), "token-1");
        assert_eq!(cache.get_token(Duration::from_secs(60)).await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
