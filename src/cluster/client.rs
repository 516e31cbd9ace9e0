use super::error::ApiError;
use super::models::{
    parse_expires_in, BootstrapConfig, BundleDownload, DownloadBundleResponse, ErrorResponse,
    ExchangeTokenRequest, ExchangeTokenResponse, GetBundlesResponse,
};
use crate::constants::DEFAULT_API_MIN_TOKEN_TTL;
use crate::download::{MetadataFetcher, MetadataFuture};
use crate::prelude::debug;
use crate::token::{checked_offset, Credential, FetchFuture, TokenCache, TokenFetcher};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// REST client for the cluster API.
///
/// Token exchange is unauthenticated. Every other call carries a bearer token taken from the
/// attached [`TokenCache`], requested with a minimum remaining lifetime of five minutes.
#[derive(Clone)]
pub struct ClusterClient {
    base: Url,
    http: reqwest::Client,
    tokens: Option<Arc<TokenCache>>,
    min_token_ttl: Duration,
}

impl Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("base", &self.base.as_str())
            .field("tokens", &self.tokens.as_ref().map(|_| "<TokenCache>"))
            .field("min_token_ttl", &self.min_token_ttl)
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Creates a client for the API rooted at `endpoint`, e.g. `https://api.example.com/cluster/v1`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidEndpoint`] if `endpoint` is not a hierarchical URL.
    pub fn new(endpoint: &str, http: reqwest::Client) -> Result<Self, ApiError> {
        let base = Url::parse(endpoint).map_err(|e| ApiError::InvalidEndpoint(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidEndpoint(format!(
                "{endpoint} cannot be used as a base URL"
            )));
        }

        Ok(Self {
            base,
            http,
            tokens: None,
            min_token_ttl: DEFAULT_API_MIN_TOKEN_TTL,
        })
    }

    /// Attaches the cache that supplies bearer tokens for authorized calls.
    #[must_use]
    pub fn with_token_cache(mut self, tokens: Arc<TokenCache>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Exchanges a refresh token for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails, the API rejects it, or the returned
    /// lifetime cannot be parsed or reaches past the representable calendar.
    pub async fn exchange_token(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        let issued_at = OffsetDateTime::now_utc();

        let req = self
            .http
            .post(self.url(&["exchangeToken"]))
            .json(&ExchangeTokenRequest { refresh_token });
        let resp: ExchangeTokenResponse = decode(req.send().await?).await?;

        let expires_in = parse_expires_in(&resp.expires_in_seconds)?;
        let expires_at = checked_offset(issued_at, Duration::from_secs(expires_in))
            .ok_or_else(|| {
                ApiError::InvalidResponse(format!("token lifetime out of range: {expires_in}s"))
            })?;
        Ok(Credential::new(resp.id_token, expires_at))
    }

    /// Returns a [`TokenFetcher`] backed by [`ClusterClient::exchange_token`].
    pub fn token_fetcher(&self) -> TokenFetcher {
        // The exchange is unauthenticated; drop the cache to avoid a reference cycle.
        let client = Self {
            tokens: None,
            ..self.clone()
        };
        Arc::new(move |refresh_token: Arc<str>| -> FetchFuture {
            let client = client.clone();
            Box::pin(async move { client.exchange_token(&refresh_token).await })
        })
    }

    /// Requests a short-lived download location for bundle `id`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if no token can be obtained, the request fails, the API rejects
    /// it, or the returned lifetime cannot be parsed.
    pub async fn download_bundle_metadata(&self, id: &str) -> Result<BundleDownload, ApiError> {
        let req = self
            .authorize(self.http.get(self.url(&["bundles", id, "download"])))
            .await?;
        let resp: DownloadBundleResponse = decode(req.send().await?).await?;

        Ok(BundleDownload {
            expires_in_seconds: parse_expires_in(&resp.expires_in_seconds)?,
            url: resp.url,
            capture_metadata_headers: resp.capture_metadata_headers,
        })
    }

    /// Returns a [`MetadataFetcher`] backed by [`ClusterClient::download_bundle_metadata`].
    pub fn metadata_fetcher(&self) -> MetadataFetcher {
        let client = self.clone();
        Arc::new(move |id: Arc<str>| -> MetadataFuture {
            let client = client.clone();
            Box::pin(async move { client.download_bundle_metadata(&id).await })
        })
    }

    /// Lists the resource bundles assigned to the cluster.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if no token can be obtained, the request fails, or the API
    /// rejects it.
    pub async fn get_bundles(&self) -> Result<GetBundlesResponse, ApiError> {
        let req = self.authorize(self.http.get(self.url(&["bundles"]))).await?;
        decode(req.send().await?).await
    }

    /// Fetches the cluster bootstrap configuration.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if no token can be obtained, the request fails, or the API
    /// rejects it.
    pub async fn get_bootstrap_config(&self) -> Result<BootstrapConfig, ApiError> {
        let req = self
            .authorize(self.http.get(self.url(&["bootstrap"])))
            .await?;
        decode(req.send().await?).await
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`: the base is hierarchical.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let Some(tokens) = &self.tokens else {
            return Ok(req);
        };
        let bearer = tokens
            .get_token(self.min_token_ttl)
            .await
            .map_err(|e| ApiError::Token(Box::new(e)))?;
        Ok(req.bearer_auth(bearer))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let request_id = resp
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if status == StatusCode::OK {
        return Ok(resp.json::<T>().await?);
    }

    let body = resp.bytes().await?;
    let message = serde_json::from_slice::<ErrorResponse>(&body)
        .ok()
        .map(|e| e.error);
    debug!(
        "Cluster API call failed: status={}, request_id={:?}",
        status, request_id
    );

    Err(match (status, message) {
        (StatusCode::BAD_REQUEST, Some(message)) => ApiError::BadRequest {
            message,
            request_id,
        },
        (StatusCode::INTERNAL_SERVER_ERROR, Some(message)) => ApiError::InternalServer {
            message,
            request_id,
        },
        _ => ApiError::UnexpectedStatus {
            status: status.as_u16(),
            request_id,
        },
    })
}
