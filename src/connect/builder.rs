use super::engine::SubscriptionEngine;
use super::events::DispatchEvent;
use super::metrics::MetricsRecorder;
use super::types::StreamFactory;
use crate::broadcast::{BroadcastConfig, Broadcaster};
use crate::constants::DEFAULT_STREAM_MIN_TOKEN_TTL;
use crate::token::TokenCache;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Reconnect/backoff configuration.
///
/// When the update stream fails, the engine retries with exponential backoff between
/// `min_backoff` and `max_backoff`. The backoff includes small jitter.
///
/// If `min_backoff > max_backoff`, they are swapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Initial delay before retrying.
    pub min_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Normalizes the configuration to ensure `min_backoff <= max_backoff`.
    pub(crate) fn normalize(mut self) -> Self {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
        self
    }
}

/// How long the engine waits between connection attempts.
///
/// There is no cap on the total time spent retrying; only terminal errors or cancellation
/// stop the engine. The delay returns to its initial value once an attempt reaches the
/// connected state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Doubling delay with jitter, bounded by the config.
    Exponential(ReconnectConfig),
    /// The same delay before every attempt.
    Fixed(Duration),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Exponential(ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub(crate) fn normalize(self) -> Self {
        match self {
            Self::Exponential(config) => Self::Exponential(config.normalize()),
            fixed @ Self::Fixed(_) => fixed,
        }
    }

    pub(crate) const fn initial_delay(&self) -> Duration {
        match self {
            Self::Exponential(config) => config.min_backoff,
            Self::Fixed(interval) => *interval,
        }
    }
}

/// Builder for [`SubscriptionEngine`].
///
/// # Example
///
/// ```no_run
/// use cloud_connect::connect::{StreamFactory, SubscriptionEngine};
/// use cloud_connect::token::TokenCache;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(tokens: Arc<TokenCache>, open: StreamFactory) {
/// let engine = SubscriptionEngine::builder(tokens, open)
///     .reconnect_backoff(Duration::from_secs(1), Duration::from_secs(30))
///     .build();
/// let mut events = engine.watch();
/// engine.start();
/// # }
/// ```
pub struct SubscriptionEngineBuilder {
    tokens: Arc<TokenCache>,
    open_stream: StreamFactory,
    reconnect: ReconnectPolicy,
    min_token_ttl: Duration,
    broadcast: BroadcastConfig,
    broadcaster: Option<Broadcaster<DispatchEvent>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    shutdown_timeout: Option<Duration>,
}

impl Debug for SubscriptionEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngineBuilder")
            .field("tokens", &self.tokens)
            .field("open_stream", &"<StreamFactory>")
            .field("reconnect", &self.reconnect)
            .field("min_token_ttl", &self.min_token_ttl)
            .field("broadcast", &self.broadcast)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl SubscriptionEngineBuilder {
    /// Creates a builder that authenticates with `tokens` and opens streams with `open_stream`.
    pub fn new(tokens: Arc<TokenCache>, open_stream: StreamFactory) -> Self {
        Self {
            tokens,
            open_stream,
            reconnect: ReconnectPolicy::default(),
            min_token_ttl: DEFAULT_STREAM_MIN_TOKEN_TTL,
            broadcast: BroadcastConfig::default(),
            broadcaster: None,
            metrics: None,
            shutdown_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Uses exponential backoff between `min_backoff` and `max_backoff`.
    #[must_use]
    pub const fn reconnect_backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        // Stored raw; normalized in `build`.
        self.reconnect = ReconnectPolicy::Exponential(ReconnectConfig {
            min_backoff,
            max_backoff,
        });
        self
    }

    /// Sets the reconnect policy.
    #[must_use]
    pub const fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the minimum remaining lifetime of the token used to open the stream.
    ///
    /// The server resets a session when its token expires, so this should be close to the
    /// maximum session length. Default is 55 minutes.
    #[must_use]
    pub const fn min_token_ttl(mut self, min_ttl: Duration) -> Self {
        self.min_token_ttl = min_ttl;
        self
    }

    /// Sets the queueing policy of the internal broadcaster.
    ///
    /// Ignored when [`SubscriptionEngineBuilder::broadcaster`] is set.
    #[must_use]
    pub const fn broadcast_config(mut self, config: BroadcastConfig) -> Self {
        self.broadcast = config;
        self
    }

    /// Publishes events through an existing broadcaster instead of a new one.
    ///
    /// The engine closes the broadcaster when it stops.
    #[must_use]
    pub fn broadcaster(mut self, broadcaster: Broadcaster<DispatchEvent>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Sets an optional metrics recorder.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the timeout used by [`SubscriptionEngine::shutdown_configured`].
    ///
    /// Default is 30 seconds. `None` waits indefinitely.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds an idle engine. Call [`SubscriptionEngine::start`] to begin connecting.
    ///
    /// Registering watchers before starting guarantees they observe the first `Connected`
    /// event.
    pub fn build(self) -> SubscriptionEngine {
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Broadcaster::new(self.broadcast));
        SubscriptionEngine::new_with(
            self.tokens,
            self.open_stream,
            broadcaster,
            self.reconnect.normalize(),
            self.min_token_ttl,
            self.metrics,
            self.shutdown_timeout,
        )
    }
}
