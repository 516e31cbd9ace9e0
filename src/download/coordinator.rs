use super::conditional::DownloadConditional;
use super::errors::{DownloadError, StorageError};
use super::url_cache::{CacheEntry, UrlCache};
use super::MetadataFetcher;
use crate::cluster::ApiError;
use crate::constants::{DEFAULT_DOWNLOAD_URL_MIN_TTL, MAX_ERROR_BODY_BYTES};
use crate::prelude::debug;
use crate::token::{checked_offset, Clock};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

/// Outcome of a successful [`DownloadCoordinator::download`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadResult {
    /// The bundle matches the supplied conditional; nothing was written.
    NotModified,
    /// The bundle was written in full to the destination.
    Downloaded {
        /// Validators to pass on the next download of this bundle.
        conditional: DownloadConditional,
        /// Values of the response headers the metadata asked to capture. Headers absent from
        /// the response are omitted.
        metadata: HashMap<String, String>,
    },
}

/// Downloads resource bundles through short-lived URLs, with conditional requests.
///
/// Download locations are cached per bundle id until they come within the configured
/// minimum TTL of expiry. At most one metadata refresh per bundle id is in flight; concurrent
/// callers for the same id wait for it and reuse its result.
pub struct DownloadCoordinator {
    http: reqwest::Client,
    fetch_metadata: MetadataFetcher,
    urls: UrlCache,
    refresh_slots: RefreshSlots,
    url_min_ttl: Duration,
}

impl Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("urls", &self.urls)
            .field("url_min_ttl", &self.url_min_ttl)
            .field("fetch_metadata", &"<MetadataFetcher>")
            .finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    /// Returns a builder around the given metadata source.
    pub fn builder(fetch_metadata: MetadataFetcher) -> DownloadCoordinatorBuilder {
        DownloadCoordinatorBuilder::new(fetch_metadata)
    }

    /// Downloads bundle `id` into `dst`.
    ///
    /// When `current` is given it is sent as `If-None-Match` / `If-Modified-Since`, and an
    /// unchanged bundle yields [`DownloadResult::NotModified`] without touching `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] if `current` is invalid (checked before any network call),
    /// the download location cannot be resolved, storage rejects the request, or writing to
    /// `dst` fails. On a write failure `dst` may hold a partial body.
    pub async fn download<W>(
        &self,
        id: &str,
        dst: &mut W,
        current: Option<&DownloadConditional>,
    ) -> Result<DownloadResult, DownloadError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Some(conditional) = current {
            conditional.validate()?;
        }

        let entry = self.download_location(id).await?;

        let mut req = self.http.get(entry.url.clone());
        if let Some(conditional) = current {
            req = conditional.apply(req);
        }
        let mut resp = req.send().await?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => return Ok(DownloadResult::NotModified),
            StatusCode::OK => {}
            _ => return Err(download_error(id, resp).await),
        }

        let conditional = DownloadConditional::from_headers(resp.headers())?;
        let metadata = capture_headers(resp.headers(), &entry.capture_headers);

        while let Some(chunk) = resp.chunk().await? {
            dst.write_all(&chunk).await?;
        }
        dst.flush().await?;

        Ok(DownloadResult::Downloaded {
            conditional,
            metadata,
        })
    }

    /// Resolves the current download location for `id`, refreshing it if needed.
    async fn download_location(&self, id: &str) -> Result<CacheEntry, DownloadError> {
        if let Some(entry) = self.urls.get(id, self.url_min_ttl) {
            return Ok(entry);
        }

        let lease = self.refresh_slot(id);
        let _guard = lease.slot.lock().await;

        // Another caller may have refreshed it while we waited.
        if let Some(entry) = self.urls.get(id, self.url_min_ttl) {
            return Ok(entry);
        }

        let requested_at = self.urls.now();
        let download = (self.fetch_metadata)(Arc::from(id))
            .await
            .map_err(|source| DownloadError::Metadata {
                id: id.to_owned(),
                source,
            })?;

        let url = Url::parse(&download.url).map_err(|source| DownloadError::InvalidUrl {
            id: id.to_owned(),
            source,
        })?;

        let lifetime = Duration::from_secs(download.expires_in_seconds);
        let expires_at =
            checked_offset(requested_at, lifetime).ok_or_else(|| DownloadError::Metadata {
                id: id.to_owned(),
                source: ApiError::InvalidResponse(format!(
                    "download URL lifetime out of range: {}s",
                    download.expires_in_seconds
                )),
            })?;

        let entry = CacheEntry {
            url,
            expires_at,
            capture_headers: download.capture_metadata_headers,
        };
        debug!(
            "Refreshed bundle download URL: id={}, expires_in_seconds={}",
            id, download.expires_in_seconds
        );
        self.urls.set(id, entry.clone());
        Ok(entry)
    }

    fn refresh_slot<'a>(&'a self, id: &'a str) -> SlotLease<'a> {
        let mut slots = lock_slots(&self.refresh_slots);
        let slot = Arc::clone(slots.entry(id.to_owned()).or_default());
        SlotLease {
            slots: &self.refresh_slots,
            id,
            slot,
        }
    }
}

type RefreshSlots = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

fn lock_slots(
    slots: &RefreshSlots,
) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A caller's claim on the refresh slot of one bundle id.
///
/// The last lease to go away removes the slot, so the map only holds ids with a refresh in
/// progress or callers queued for one.
struct SlotLease<'a> {
    slots: &'a RefreshSlots,
    id: &'a str,
    slot: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut slots = lock_slots(self.slots);
        // Leases are only taken under this lock, so the count cannot grow behind our back.
        let unshared = slots
            .get(self.id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
            && Arc::strong_count(&self.slot) == 2;
        if unshared {
            slots.remove(self.id);
        }
    }
}

fn capture_headers(headers: &HeaderMap, names: &[String]) -> HashMap<String, String> {
    names
        .iter()
        .filter_map(|name| {
            let value = headers.get(name.as_str())?.to_str().ok()?;
            Some((name.clone(), value.to_owned()))
        })
        .collect()
}

async fn download_error(id: &str, mut resp: Response) -> DownloadError {
    let status = resp.status();
    let xml = is_xml(resp.headers());

    let mut body = Vec::new();
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_ERROR_BODY_BYTES - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if body.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Error reading bundle download error body: id={}, error={}", id, e);
                break;
            }
        }
    }
    let body = String::from_utf8_lossy(&body);

    if xml {
        if let Some(err) = StorageError::from_xml(&body) {
            return DownloadError::Storage(err);
        }
    }

    debug!(
        "Bundle download error: id={}, status={}, body={}",
        id, status, body
    );
    DownloadError::Http { status }
}

fn is_xml(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/xml" || media_type == "text/xml"
}

/// Builder for [`DownloadCoordinator`].
pub struct DownloadCoordinatorBuilder {
    fetch_metadata: MetadataFetcher,
    http: Option<reqwest::Client>,
    url_min_ttl: Duration,
    clock: Option<Clock>,
}

impl Debug for DownloadCoordinatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinatorBuilder")
            .field("fetch_metadata", &"<MetadataFetcher>")
            .field("http", &self.http.as_ref().map(|_| "<Client>"))
            .field("url_min_ttl", &self.url_min_ttl)
            .field("clock", &self.clock.as_ref().map(|_| "<Clock>"))
            .finish()
    }
}

impl DownloadCoordinatorBuilder {
    /// Creates a builder around the given metadata source.
    pub fn new(fetch_metadata: MetadataFetcher) -> Self {
        Self {
            fetch_metadata,
            http: None,
            url_min_ttl: DEFAULT_DOWNLOAD_URL_MIN_TTL,
            clock: None,
        }
    }

    /// Sets the HTTP client used to reach bundle storage.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets the minimum remaining lifetime a cached download URL must have to be reused.
    ///
    /// Default is 60 seconds.
    #[must_use]
    pub const fn url_min_ttl(mut self, min_ttl: Duration) -> Self {
        self.url_min_ttl = min_ttl;
        self
    }

    /// Overrides the clock used for URL expiry.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> DownloadCoordinator {
        let urls = match self.clock {
            Some(clock) => UrlCache::with_clock(clock),
            None => UrlCache::new(),
        };
        DownloadCoordinator {
            http: self.http.unwrap_or_default(),
            fetch_metadata: self.fetch_metadata,
            urls,
            refresh_slots: Mutex::new(HashMap::new()),
            url_min_ttl: self.url_min_ttl,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::{ApiError, BundleDownload};
    use crate::download::MetadataFuture;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetcher(url: &'static str, calls: Arc<AtomicUsize>) -> MetadataFetcher {
        Arc::new(move |_id: Arc<str>| -> MetadataFuture {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(BundleDownload {
                    url: url.to_owned(),
                    expires_in_seconds: 3600,
                    capture_metadata_headers: vec!["x-bundle-version".to_owned()],
                })
            })
        })
    }

    #[test]
    fn is_xml_accepts_parameters_and_case() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Application/XML; charset=UTF-8"),
        );
        assert!(is_xml(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        assert!(is_xml(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_xml(&headers));

        assert!(!is_xml(&HeaderMap::new()));
    }

    #[test]
    fn capture_headers_skips_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-bundle-version", HeaderValue::from_static("42"));
        let captured = capture_headers(
            &headers,
            &["x-bundle-version".to_owned(), "x-absent".to_owned()],
        );
        assert_eq!(captured.len(), 1);
        assert_eq!(captured["x-bundle-version"], "42");
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_metadata_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = Arc::new(
            DownloadCoordinator::builder(counting_fetcher(
                "https://storage.example.com/b?sig=1",
                Arc::clone(&calls),
            ))
            .build(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.download_location("bundle").await })
            })
            .collect();
        for h in handles {
            let entry = h.await.unwrap().unwrap();
            assert_eq!(entry.url.as_str(), "https://storage.example.com/b?sig=1");
            assert_eq!(entry.capture_headers, vec!["x-bundle-version".to_owned()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.refresh_slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_slots_are_released_after_failures() {
        let fetcher: MetadataFetcher = Arc::new(|_id: Arc<str>| -> MetadataFuture {
            Box::pin(async { Err(ApiError::InvalidResponse("boom".to_owned())) })
        });
        let coordinator = DownloadCoordinator::builder(fetcher).build();

        for id in ["a", "b", "c"] {
            assert!(coordinator.download_location(id).await.is_err());
        }
        assert!(coordinator.refresh_slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn url_lifetime_past_the_calendar_is_invalid_metadata() {
        let fetcher: MetadataFetcher = Arc::new(|_id: Arc<str>| -> MetadataFuture {
            Box::pin(async {
                Ok(BundleDownload {
                    url: "https://storage.example.com/b?sig=1".to_owned(),
                    expires_in_seconds: u64::MAX,
                    capture_metadata_headers: Vec::new(),
                })
            })
        });
        let coordinator = DownloadCoordinator::builder(fetcher).build();

        match coordinator.download_location("bundle").await {
            Err(DownloadError::Metadata {
                id,
                source: ApiError::InvalidResponse(_),
            }) => assert_eq!(id, "bundle"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(coordinator.urls.get("bundle", Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn invalid_conditional_fails_before_any_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator =
            DownloadCoordinator::builder(counting_fetcher("https://s/b", Arc::clone(&calls)))
                .build();

        let bad: DownloadConditional = serde_json::from_str("{}").unwrap();
        let mut sink = Vec::new();
        let err = coordinator
            .download("bundle", &mut sink, Some(&bad))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidConditional));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn metadata_failure_names_bundle() {
        let fetcher: MetadataFetcher = Arc::new(|_id: Arc<str>| -> MetadataFuture {
            Box::pin(async {
                Err(ApiError::BadRequest {
                    message: "unknown bundle".to_owned(),
                    request_id: None,
                })
            })
        });
        let coordinator = DownloadCoordinator::builder(fetcher).build();

        let mut sink = Vec::new();
        let err = coordinator
            .download("missing", &mut sink, None)
            .await
            .unwrap_err();
        match err {
            DownloadError::Metadata { id, source } => {
                assert_eq!(id, "missing");
                assert!(matches!(source, ApiError::BadRequest { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator =
            DownloadCoordinator::builder(counting_fetcher("not a url", calls)).build();

        let mut sink = Vec::new();
        assert!(matches!(
            coordinator.download("bundle", &mut sink, None).await,
            Err(DownloadError::InvalidUrl { .. })
        ));
    }
}
