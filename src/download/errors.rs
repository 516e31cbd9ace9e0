use crate::cluster::ApiError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by [`DownloadCoordinator::download`](super::DownloadCoordinator::download).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DownloadError {
    /// The supplied conditional carries neither an `ETag` nor a `Last-Modified` value.
    #[error("either ETag or Last-Modified must be set")]
    InvalidConditional,

    /// The download location for the bundle could not be obtained.
    #[error("error getting download URL for bundle {id}: {source}")]
    Metadata {
        /// Bundle identifier.
        id: String,
        /// Underlying API error.
        #[source]
        source: ApiError,
    },

    /// The download location returned by the API is not a valid URL.
    #[error("invalid download URL for bundle {id}: {source}")]
    InvalidUrl {
        /// Bundle identifier.
        id: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The request to bundle storage failed before a response was received, or the body
    /// could not be read.
    #[error("error requesting bundle: {0}")]
    Request(#[from] reqwest::Error),

    /// Bundle storage answered with a structured XML error.
    #[error(transparent)]
    Storage(StorageError),

    /// Bundle storage answered with an unexpected status and no structured error.
    #[error("download failed: {status}")]
    Http {
        /// Response status.
        status: StatusCode,
    },

    /// The bundle could not be written to the destination.
    #[error("error writing bundle: {0}")]
    Write(#[from] std::io::Error),

    /// The successful response carried neither `ETag` nor `Last-Modified`.
    #[error("cannot obtain cache conditions from response: neither ETag nor Last-Modified is set")]
    MissingValidators,
}

/// Structured error body returned by bundle storage.
///
/// The body is an XML document of the form
/// `<Error><Code>..</Code><Message>..</Message><Details>..</Details></Error>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    /// Provider error code, e.g. `AccessDenied`.
    #[serde(rename = "Code", default)]
    pub code: String,
    /// Human-readable message.
    #[serde(rename = "Message", default)]
    pub message: String,
    /// Additional provider details.
    #[serde(rename = "Details", default)]
    pub details: String,
}

impl StorageError {
    /// Parses a storage `<Error>` document. Bodies without an error code are not one.
    pub(crate) fn from_xml(body: &str) -> Option<Self> {
        quick_xml::de::from_str(body)
            .ok()
            .filter(|err: &Self| !err.code.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_parses_provider_body() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access denied.</Message><Details>signature expired</Details></Error>"#;
        let err = StorageError::from_xml(body).unwrap();
        assert_eq!(err.code, "AccessDenied");
        assert_eq!(err.details, "signature expired");
        assert_eq!(err.to_string(), "AccessDenied: Access denied.");
    }

    #[test]
    fn storage_error_rejects_empty_body() {
        assert!(StorageError::from_xml("").is_none());
    }

    #[test]
    fn storage_error_rejects_documents_without_code() {
        assert!(StorageError::from_xml("<html><body>Bad gateway</body></html>").is_none());
        assert!(StorageError::from_xml("<Error><Message>no code</Message></Error>").is_none());
    }

    #[test]
    fn http_error_mentions_status() {
        let err = DownloadError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        };
        assert_eq!(err.to_string(), "download failed: 500 Internal Server Error");
    }
}
