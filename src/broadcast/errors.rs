use thiserror::Error;

/// Boxed error returned by subscriber handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`Broadcaster`](super::Broadcaster) and its subscriptions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BroadcastError {
    /// The broadcaster was closed.
    #[error("broadcaster is closed")]
    Closed,

    /// The subscriber fell behind for longer than the publish timeout and was evicted.
    ///
    /// Every event delivered before the eviction was observed in order; nothing after it is.
    #[error("subscriber fell behind and was evicted")]
    Lagged,

    /// The subscriber's handler returned an error.
    #[error("subscriber handler failed: {0}")]
    Handler(#[source] BoxError),
}
