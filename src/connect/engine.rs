use super::builder::{ReconnectPolicy, SubscriptionEngineBuilder};
use super::errors::{ConnectError, MetricsErrorKind};
use super::events::{DispatchEvent, EngineState};
use super::metrics::MetricsRecorder;
use super::types::StreamFactory;
use super::watch::WatchHandlers;
use crate::broadcast::{BoxError, BroadcastError, Broadcaster, Subscription};
use crate::prelude::warn;
use crate::token::TokenCache;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Keeps a streaming subscription to the control channel alive.
///
/// The engine runs one background task that obtains a token, opens the update stream and
/// turns each received frame into a [`DispatchEvent`] delivered to every watcher. Retryable
/// failures (transport drops, end of stream, failed dials, unavailable token issuer) are
/// retried with backoff, without limit. Terminal failures (rejected credentials,
/// unrecognized messages, undeliverable events) stop the engine; the cause is available
/// from [`SubscriptionEngine::wait`].
///
/// Watchers see `StateChanged(Connected)` when a stream opens, the stream's events in order,
/// and `StateChanged(Disconnected)` when it closes. When the engine stops, every watcher
/// ends with [`BroadcastError::Closed`].
///
/// Dropping the engine cancels the background task.
pub struct SubscriptionEngine {
    inner: Arc<Inner>,
    started: AtomicBool,
    closed: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Option<Duration>,
}

impl Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("state", &self.state())
            .field("reconnect", &self.inner.reconnect)
            .field("min_token_ttl", &self.inner.min_token_ttl)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

pub(super) struct Inner {
    pub(super) tokens: Arc<TokenCache>,
    pub(super) open_stream: StreamFactory,
    pub(super) broadcaster: Broadcaster<DispatchEvent>,
    pub(super) reconnect: ReconnectPolicy,
    pub(super) min_token_ttl: Duration,
    pub(super) metrics: Option<Arc<dyn MetricsRecorder>>,
    pub(super) cancel: CancellationToken,
    state: watch::Sender<EngineState>,
    outcome: watch::Sender<Option<Arc<ConnectError>>>,
}

impl SubscriptionEngine {
    /// Returns a builder for an engine that authenticates with `tokens` and opens streams with
    /// `open_stream`.
    pub fn builder(tokens: Arc<TokenCache>, open_stream: StreamFactory) -> SubscriptionEngineBuilder {
        SubscriptionEngineBuilder::new(tokens, open_stream)
    }

    pub(super) fn new_with(
        tokens: Arc<TokenCache>,
        open_stream: StreamFactory,
        broadcaster: Broadcaster<DispatchEvent>,
        reconnect: ReconnectPolicy,
        min_token_ttl: Duration,
        metrics: Option<Arc<dyn MetricsRecorder>>,
        shutdown_timeout: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (outcome, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                tokens,
                open_stream,
                broadcaster,
                reconnect,
                min_token_ttl,
                metrics,
                cancel: CancellationToken::new(),
                state,
                outcome,
            }),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            shutdown_timeout,
        }
    }

    /// Spawns the background task. Idempotent; does nothing after shutdown.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self) {
        if self.closed.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let task_inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let abort_guard = AbortGuard(&task_inner);
            let cause = task_inner.run_supervisor().await;
            task_inner.finish(cause);
            drop(abort_guard);
        });
        *self.supervisor_slot() = Some(handle);
    }

    /// Registers a watcher. It receives every event published after this call.
    pub fn watch(&self) -> Subscription<DispatchEvent> {
        self.inner.broadcaster.subscription()
    }

    /// Dispatches events to `handlers` until `cancel` fires or the engine stops.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Closed`] once the engine has stopped, or
    /// [`BroadcastError::Lagged`] if the handlers fell too far behind.
    pub async fn watch_with<H>(
        &self,
        cancel: &CancellationToken,
        mut handlers: H,
    ) -> Result<(), BroadcastError>
    where
        H: WatchHandlers,
    {
        self.inner
            .broadcaster
            .subscribe(cancel, |event| {
                handlers.dispatch(&event);
                std::future::ready(Ok::<(), BoxError>(()))
            })
            .await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Waits for the engine to stop and returns why it stopped.
    ///
    /// A shutdown yields [`ConnectError::Cancelled`]; otherwise the terminal error is returned.
    pub async fn wait(&self) -> Arc<ConnectError> {
        let mut rx = self.inner.outcome.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());
        outcome.unwrap_or_else(|| Arc::new(ConnectError::Aborted))
    }

    /// Returns why the engine stopped, or `None` while it is still running.
    pub fn outcome(&self) -> Option<Arc<ConnectError>> {
        self.inner.outcome.borrow().clone()
    }

    /// Cancels the background task and waits for it to finish.
    ///
    /// Idempotent. May wait indefinitely if the task does not respond; prefer
    /// [`SubscriptionEngine::shutdown_with_timeout`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        let handle = self.supervisor_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Error joining subscription engine task during shutdown: error={e}");
                self.inner
                    .record_error(MetricsErrorKind::SupervisorJoinFailed);
            }
        }
        self.inner.finish(ConnectError::Cancelled);
    }

    /// Cancels the background task and waits at most `timeout` for it to finish, aborting it
    /// otherwise.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::ShutdownTimeout`] if the task had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), ConnectError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();

        let handle = self.supervisor_slot().take();
        let Some(mut handle) = handle else {
            self.inner.finish(ConnectError::Cancelled);
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Error joining subscription engine task during shutdown: error={e}");
                self.inner
                    .record_error(MetricsErrorKind::SupervisorJoinFailed);
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded; aborting subscription engine task");
                handle.abort();
                let _unused: Result<_, _> = handle.await;
                Err(ConnectError::ShutdownTimeout)
            }
        }
    }

    /// Shuts down using the timeout configured on the builder.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::ShutdownTimeout`] if the configured timeout is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), ConnectError> {
        if let Some(timeout) = self.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }

    fn supervisor_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SubscriptionEngine {
    fn drop(&mut self) {
        // Best-effort cancellation. Do not block in Drop.
        self.inner.cancel.cancel();
    }
}

impl Inner {
    pub(super) fn set_state(&self, state: EngineState) {
        self.state.send_if_modified(|current| {
            if *current == EngineState::Stopped || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub(super) fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_error(kind);
        }
    }

    /// Records the first stop cause, then moves to `Stopped` and closes the broadcaster.
    fn finish(&self, cause: ConnectError) {
        self.outcome.send_if_modified(|outcome| {
            if outcome.is_some() {
                return false;
            }
            *outcome = Some(Arc::new(cause));
            true
        });
        self.state.send_replace(EngineState::Stopped);
        self.broadcaster.close();
    }
}

/// Reports [`ConnectError::Aborted`] if the engine task unwinds without finishing.
struct AbortGuard<'a>(&'a Inner);

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        self.0.finish(ConnectError::Aborted);
    }
}
