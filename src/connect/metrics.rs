use super::errors::MetricsErrorKind;
use std::time::Duration;

/// Receives metrics from a [`SubscriptionEngine`](super::SubscriptionEngine).
///
/// Implementations must be cheap and non-blocking; they are called from the engine task.
pub trait MetricsRecorder: Send + Sync {
    /// The update stream was opened and watchers were notified.
    fn record_connected(&self);

    /// The engine is about to wait `delay` before the next connection attempt.
    fn record_reconnect(&self, delay: Duration);

    /// An attempt failed with the given kind of error.
    fn record_error(&self, kind: MetricsErrorKind);
}
