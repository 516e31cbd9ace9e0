use super::errors::DownloadError;
use reqwest::header::{
    HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

/// Cache validators of a previously downloaded bundle.
///
/// At least one of the two validators is non-empty. Callers persist the value returned by a
/// successful download and pass it back on the next call to receive `NotModified` when the
/// bundle did not change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConditional {
    #[serde(default)]
    etag: String,
    #[serde(default)]
    last_modified: String,
}

impl DownloadConditional {
    /// Creates a conditional from an `ETag` and a `Last-Modified` value; either may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidConditional`] if both are empty.
    pub fn new(
        etag: impl Into<String>,
        last_modified: impl Into<String>,
    ) -> Result<Self, DownloadError> {
        let conditional = Self {
            etag: etag.into(),
            last_modified: last_modified.into(),
        };
        conditional.validate()?;
        Ok(conditional)
    }

    /// The `ETag` validator, if set.
    pub fn etag(&self) -> Option<&str> {
        non_empty(&self.etag)
    }

    /// The `Last-Modified` validator, if set.
    pub fn last_modified(&self) -> Option<&str> {
        non_empty(&self.last_modified)
    }

    /// Checks that at least one validator is set.
    ///
    /// Values built with [`DownloadConditional::new`] always pass; deserialized ones may not.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidConditional`] if both validators are empty.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.etag.is_empty() && self.last_modified.is_empty() {
            return Err(DownloadError::InvalidConditional);
        }
        Ok(())
    }

    pub(crate) fn apply(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(etag) = self.etag() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = self.last_modified() {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }
        req
    }

    pub(crate) fn from_headers(headers: &HeaderMap) -> Result<Self, DownloadError> {
        let get = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        };
        Self::new(get(ETAG), get(LAST_MODIFIED)).map_err(|_| DownloadError::MissingValidators)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
