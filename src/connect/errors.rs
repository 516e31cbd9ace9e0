use crate::broadcast::{BoxError, BroadcastError};
use crate::token::TokenError;
use std::fmt;
use thiserror::Error;

/// Errors produced by the update stream transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The transport failed: dial error, connection reset, and the like.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The server closed the stream with a status.
    #[error("stream closed by server: {0}")]
    Status(String),
}

impl StreamError {
    /// Wraps any error as a transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

/// Why a [`SubscriptionEngine`](super::SubscriptionEngine) attempt ended, and, for terminal
/// causes, why the engine stopped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// No token suitable for opening the stream could be obtained.
    #[error("error obtaining stream token: {0}")]
    Token(#[source] TokenError),

    /// The stream could not be opened.
    #[error("error opening update stream: {0}")]
    Open(#[source] StreamError),

    /// Receiving from an established stream failed.
    #[error("error receiving from update stream: {0}")]
    Receive(#[source] StreamError),

    /// The server ended the stream.
    #[error("update stream ended")]
    StreamEnded,

    /// The server sent a message this client does not understand.
    #[error("unrecognized message: {0}")]
    UnrecognizedMessage(String),

    /// An event could not be delivered to watchers.
    #[error("error publishing {event} event: {source}")]
    Publish {
        /// Event label, e.g. `disconnected`.
        event: &'static str,
        /// Underlying broadcast error.
        #[source]
        source: BroadcastError,
    },

    /// The engine was shut down or dropped.
    #[error("subscription engine cancelled")]
    Cancelled,

    /// The engine task ended without reporting a cause (panic or forced abort).
    #[error("subscription engine task aborted")]
    Aborted,

    /// Graceful shutdown did not finish in time and the engine task was aborted.
    #[error("subscription engine shutdown timed out")]
    ShutdownTimeout,
}

impl ConnectError {
    pub(super) const fn metrics_kind(&self) -> Option<MetricsErrorKind> {
        match self {
            Self::Token(_) => Some(MetricsErrorKind::TokenFetch),
            Self::Open(_) => Some(MetricsErrorKind::StreamOpen),
            Self::Receive(_) => Some(MetricsErrorKind::StreamError),
            Self::StreamEnded => Some(MetricsErrorKind::StreamEnded),
            Self::UnrecognizedMessage(_) => Some(MetricsErrorKind::UnrecognizedMessage),
            Self::Publish { .. } => Some(MetricsErrorKind::PublishFailed),
            Self::Cancelled | Self::Aborted | Self::ShutdownTimeout => None,
        }
    }
}

/// Outcome of one failed connection attempt.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Back off and try again.
    Retryable(ConnectError),
    /// Stop the engine with this cause.
    Terminal(ConnectError),
}

impl AttemptError {
    pub(super) fn from_token_error(err: TokenError) -> Self {
        if err.is_retryable() {
            Self::Retryable(ConnectError::Token(err))
        } else {
            Self::Terminal(ConnectError::Token(err))
        }
    }
}

/// Error kinds for structured metrics reporting.
///
/// Use these stable, low-cardinality labels when recording metrics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MetricsErrorKind {
    /// Failed to obtain a token for the stream.
    TokenFetch,
    /// Failed to open the update stream.
    StreamOpen,
    /// Error occurred while reading from the stream.
    StreamError,
    /// The update stream ended.
    StreamEnded,
    /// The server sent an unrecognized message.
    UnrecognizedMessage,
    /// An event could not be delivered to watchers.
    PublishFailed,
    /// Failed to join the engine task during shutdown.
    SupervisorJoinFailed,
}

impl MetricsErrorKind {
    /// Returns a string representation of the error kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenFetch => "token_fetch",
            Self::StreamOpen => "stream_open",
            Self::StreamError => "stream_error",
            Self::StreamEnded => "stream_ended",
            Self::UnrecognizedMessage => "unrecognized_message",
            Self::PublishFailed => "publish_failed",
            Self::SupervisorJoinFailed => "supervisor_join_failed",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
