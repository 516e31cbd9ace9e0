use thiserror::Error;

/// Errors returned by the cluster API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The API rejected the request (HTTP 400). Retrying the same request will not help.
    #[error("bad request: {message}{}", request_id_suffix(.request_id))]
    BadRequest {
        /// Error message returned by the API.
        message: String,
        /// Value of the `X-Request-Id` response header, if present.
        request_id: Option<String>,
    },

    /// The API failed internally (HTTP 500).
    #[error("internal server error: {message}{}", request_id_suffix(.request_id))]
    InternalServer {
        /// Error message returned by the API.
        message: String,
        /// Value of the `X-Request-Id` response header, if present.
        request_id: Option<String>,
    },

    /// Any other non-success status.
    #[error("unexpected response: {status}{}", request_id_suffix(.request_id))]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Value of the `X-Request-Id` response header, if present.
        request_id: Option<String>,
    },

    /// The request could not be sent or the response could not be read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was well formed but carried an unusable value.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The configured API endpoint is not usable as a base URL.
    #[error("invalid cluster API endpoint: {0}")]
    InvalidEndpoint(String),

    /// The bearer token for the call could not be obtained.
    #[error("error getting token: {0}")]
    Token(#[source] Box<crate::token::TokenError>),
}

impl ApiError {
    /// Returns `true` if retrying the same call later may succeed.
    ///
    /// Rejections and malformed responses are permanent; server failures and transport
    /// problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BadRequest { .. } | Self::InvalidResponse(_) | Self::InvalidEndpoint(_) => false,
            Self::InternalServer { .. } | Self::UnexpectedStatus { .. } | Self::Http(_) => true,
            Self::Token(e) => e.is_retryable(),
        }
    }

    /// Request id reported by the API, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::BadRequest { request_id, .. }
            | Self::InternalServer { request_id, .. }
            | Self::UnexpectedStatus { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

fn request_id_suffix(request_id: &Option<String>) -> String {
    request_id
        .as_deref()
        .map_or_else(String::new, |id| format!(" (request id: {id})"))
}
