use super::builder::ReconnectPolicy;
use super::engine::Inner;
use super::errors::{AttemptError, ConnectError, MetricsErrorKind};
use super::events::{ConnectionState, DispatchEvent, EngineState, Frame};
use super::types::FrameStream;
use crate::prelude::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Consecutive identical failures logged at WARN before dropping to DEBUG.
const MAX_CONSECUTIVE_SAME_ERROR: u32 = 3;

/// Tracks repeated errors to suppress log noise.
///
/// The first N consecutive occurrences of an error kind log at WARN, later ones at DEBUG.
/// A different kind, or a reset after success, starts the count over.
pub(super) struct ErrorTracker {
    last_error_kind: Option<MetricsErrorKind>,
    consecutive_same_error: u32,
    max_consecutive: u32,
}

impl ErrorTracker {
    pub(super) const fn new(max_consecutive: u32) -> Self {
        Self {
            last_error_kind: None,
            consecutive_same_error: 0,
            max_consecutive,
        }
    }

    pub(super) fn record_error(&mut self, error_kind: MetricsErrorKind) -> bool {
        let should_warn = self.last_error_kind != Some(error_kind)
            || self.consecutive_same_error < self.max_consecutive;

        if self.last_error_kind == Some(error_kind) {
            self.consecutive_same_error += 1;
        } else {
            self.consecutive_same_error = 1;
            self.last_error_kind = Some(error_kind);
        }

        should_warn
    }

    pub(super) fn reset(&mut self) {
        self.consecutive_same_error = 0;
        self.last_error_kind = None;
    }

    pub(super) const fn consecutive_count(&self) -> u32 {
        self.consecutive_same_error
    }
}

/// Current reconnect delay under a [`ReconnectPolicy`].
pub(super) struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    pub(super) const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current: policy.initial_delay(),
            policy,
        }
    }

    pub(super) const fn delay(&self) -> Duration {
        self.current
    }

    pub(super) fn advance(&mut self) {
        self.current = match self.policy {
            ReconnectPolicy::Exponential(config) => next_backoff(self.current, config.max_backoff),
            ReconnectPolicy::Fixed(interval) => interval,
        };
    }

    pub(super) fn reset(&mut self) {
        self.current = self.policy.initial_delay();
    }
}

/// Sleeps for `dur`; returns `true` if `token` was cancelled first.
pub(super) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => true,
        () = sleep(dur) => false,
    }
}

/// Exponential backoff with small jitter.
///
/// Doubles the current duration, clamps it to `max`, then adds up to 10% jitter (still
/// clamped). Jitter is computed in milliseconds.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let cur = current.as_millis().min(u128::from(u64::MAX)) as u64;
    let max = max.as_millis().min(u128::from(u64::MAX)) as u64;

    let base = (cur.saturating_mul(2)).min(max);
    if base == 0 {
        return Duration::from_millis(0);
    }

    let jitter = base / 10;
    let add = if jitter > 0 {
        fastrand::u64(0..=jitter)
    } else {
        0
    };

    Duration::from_millis((base.saturating_add(add)).min(max))
}

impl Inner {
    /// Runs connection attempts until a terminal error or cancellation; returns the cause.
    pub(super) async fn run_supervisor(&self) -> ConnectError {
        let supervisor_id = fastrand::u64(..);
        info!("Starting subscription engine: id={}", supervisor_id);

        let mut backoff = Backoff::new(self.reconnect);
        let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

        loop {
            if self.cancel.is_cancelled() {
                debug!("Cancellation signal received; stopping subscription engine");
                return ConnectError::Cancelled;
            }

            let cause = match self.attempt(&mut backoff, &mut error_tracker).await {
                AttemptError::Terminal(ConnectError::Cancelled) => {
                    debug!("Cancellation signal received; stopping subscription engine");
                    return ConnectError::Cancelled;
                }
                AttemptError::Terminal(cause) => {
                    error!(
                        "Subscription engine stopping on terminal error: id={}, error={}",
                        supervisor_id, cause
                    );
                    self.record_failure(&cause);
                    return cause;
                }
                AttemptError::Retryable(cause) => cause,
            };

            self.record_failure(&cause);
            let delay = backoff.delay();
            let should_warn = match cause.metrics_kind() {
                Some(kind) => error_tracker.record_error(kind),
                None => true,
            };
            if should_warn {
                warn!(
                    "Update stream attempt failed; reconnecting: id={}, error={}, backoff_ms={}",
                    supervisor_id,
                    cause,
                    delay.as_millis()
                );
            } else {
                debug!(
                    "Update stream attempt failed (repeated); reconnecting: id={}, error={}, backoff_ms={}, consecutive_failures={}",
                    supervisor_id,
                    cause,
                    delay.as_millis(),
                    error_tracker.consecutive_count()
                );
            }

            self.set_state(EngineState::Idle);
            if let Some(metrics) = self.metrics.as_deref() {
                metrics.record_reconnect(delay);
            }
            if sleep_or_cancel(&self.cancel, delay).await {
                debug!("Cancellation signal received during backoff; stopping subscription engine");
                return ConnectError::Cancelled;
            }
            backoff.advance();
        }
    }

    /// One connection attempt: token, open, announce, receive, announce.
    async fn attempt(
        &self,
        backoff: &mut Backoff,
        error_tracker: &mut ErrorTracker,
    ) -> AttemptError {
        self.set_state(EngineState::Connecting);

        let bearer = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return AttemptError::Terminal(ConnectError::Cancelled),
            token = self.tokens.get_token(self.min_token_ttl) => match token {
                Ok(bearer) => bearer,
                Err(e) => return AttemptError::from_token_error(e),
            },
        };

        let mut stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return AttemptError::Terminal(ConnectError::Cancelled),
            opened = (self.open_stream)(bearer) => match opened {
                Ok(stream) => stream,
                Err(e) => return AttemptError::Retryable(ConnectError::Open(e)),
            },
        };

        if let Err(e) = self
            .publish(DispatchEvent::StateChanged(ConnectionState::Connected))
            .await
        {
            return AttemptError::Terminal(e);
        }

        if error_tracker.consecutive_count() > 0 {
            info!(
                "Update stream recovered after {} consecutive failures",
                error_tracker.consecutive_count()
            );
        }
        error_tracker.reset();
        backoff.reset();
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_connected();
        }
        info!("Connected to update stream");
        self.set_state(EngineState::Streaming);

        let outcome = self.receive(&mut stream).await;

        self.set_state(EngineState::Disconnecting);
        let disconnected = self
            .publish(DispatchEvent::StateChanged(ConnectionState::Disconnected))
            .await;
        match (outcome, disconnected) {
            (AttemptError::Retryable(_), Err(e)) => AttemptError::Terminal(e),
            (outcome, _) => outcome,
        }
    }

    async fn receive(&self, stream: &mut FrameStream) -> AttemptError {
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return AttemptError::Terminal(ConnectError::Cancelled),
                item = stream.next() => item,
            };

            let event = match item {
                Some(Ok(Frame::ConfigUpdated)) => DispatchEvent::ConfigUpdated,
                Some(Ok(Frame::BootstrapConfigUpdated)) => DispatchEvent::BootstrapConfigUpdated,
                Some(Ok(Frame::Unrecognized(kind))) => {
                    return AttemptError::Terminal(ConnectError::UnrecognizedMessage(kind));
                }
                Some(Err(e)) => return AttemptError::Retryable(ConnectError::Receive(e)),
                None => return AttemptError::Retryable(ConnectError::StreamEnded),
            };

            debug!("Update stream event: {}", event);
            if let Err(e) = self.publish(event).await {
                return AttemptError::Terminal(e);
            }
        }
    }

    async fn publish(&self, event: DispatchEvent) -> Result<(), ConnectError> {
        let label = event.label();
        self.broadcaster
            .publish(event)
            .await
            .map_err(|source| ConnectError::Publish {
                event: label,
                source,
            })
    }

    fn record_failure(&self, cause: &ConnectError) {
        if let Some(kind) = cause.metrics_kind() {
            self.record_error(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::ReconnectConfig;

    #[test]
    fn error_tracker_warns_for_first_three_repeats() {
        let mut tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);
        let warned: Vec<bool> = (0..5)
            .map(|_| tracker.record_error(MetricsErrorKind::StreamOpen))
            .collect();
        assert_eq!(warned, vec![true, true, true, false, false]);
        assert_eq!(tracker.consecutive_count(), 5);

        assert!(tracker.record_error(MetricsErrorKind::StreamEnded));
        assert_eq!(tracker.consecutive_count(), 1);

        tracker.reset();
        assert_eq!(tracker.consecutive_count(), 0);
    }

    #[test]
    fn next_backoff_doubles_within_jitter_and_clamps() {
        for _ in 0..100 {
            let next = next_backoff(Duration::from_millis(100), Duration::from_secs(10));
            assert!(next >= Duration::from_millis(200));
            assert!(next <= Duration::from_millis(220));
        }
        assert_eq!(
            next_backoff(Duration::from_secs(8), Duration::from_secs(10)),
            Duration::from_secs(10)
        );
        assert_eq!(
            next_backoff(Duration::ZERO, Duration::from_secs(10)),
            Duration::ZERO
        );
    }

    #[test]
    fn backoff_resets_to_initial_delay() {
        let mut backoff = Backoff::new(ReconnectPolicy::Exponential(ReconnectConfig {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }));
        assert_eq!(backoff.delay(), Duration::from_millis(100));
        backoff.advance();
        backoff.advance();
        assert!(backoff.delay() >= Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let mut backoff = Backoff::new(ReconnectPolicy::Fixed(Duration::from_secs(2)));
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.delay(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(!sleep_or_cancel(&token, Duration::from_millis(10)).await);
        token.cancel();
        assert!(sleep_or_cancel(&token, Duration::from_secs(3600)).await);
    }
}
