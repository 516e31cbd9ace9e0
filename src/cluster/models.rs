use serde::{Deserialize, Serialize};

use super::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ExchangeTokenRequest<'a> {
    pub(super) refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ExchangeTokenResponse {
    pub(super) id_token: String,
    pub(super) expires_in_seconds: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DownloadBundleResponse {
    pub(super) url: String,
    pub(super) expires_in_seconds: String,
    #[serde(default)]
    pub(super) capture_metadata_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub(super) error: String,
}

/// Download location for a resource bundle, valid for a limited time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleDownload {
    /// Signed URL the bundle can be fetched from.
    pub url: String,
    /// Seconds until `url` stops working, counted from when the metadata was requested.
    pub expires_in_seconds: u64,
    /// Names of response headers the caller should capture from the download.
    pub capture_metadata_headers: Vec<String>,
}

/// A resource bundle known to the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Bundle {
    /// Bundle identifier.
    pub id: String,
}

/// Bundles currently assigned to the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GetBundlesResponse {
    /// Bundles, in the order the API returned them.
    #[serde(default)]
    pub bundles: Vec<Bundle>,
}

/// Bootstrap configuration of the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// Connection string for the databroker storage backend.
    #[serde(default)]
    pub databroker_storage_connection: Option<String>,
}

/// Parses the decimal-string seconds the API uses for lifetimes.
pub(super) fn parse_expires_in(value: &str) -> Result<u64, ApiError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ApiError::InvalidResponse(format!("error parsing expires in {value:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_expires_in_accepts_decimal_strings() {
        assert_eq!(parse_expires_in("3600").unwrap(), 3600);
        assert_eq!(parse_expires_in(" 15 ").unwrap(), 15);
    }

    #[test]
    fn parse_expires_in_rejects_garbage() {
        assert!(matches!(
            parse_expires_in("soon"),
            Err(ApiError::InvalidResponse(_))
        ));
        assert!(parse_expires_in("-1").is_err());
    }

    #[test]
    fn download_response_defaults_capture_headers() {
        let resp: DownloadBundleResponse =
            serde_json::from_str(r#"{"url":"https://s.example/b","expiresInSeconds":"60"}"#)
                .unwrap();
        assert!(resp.capture_metadata_headers.is_empty());
        assert_eq!(resp.expires_in_seconds, "60");
    }
}
