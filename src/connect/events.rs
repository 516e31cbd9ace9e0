use crate::constants::CONFIG_BUNDLE_KEY;
use std::fmt;

/// A message received on the update stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// The cluster configuration changed.
    ConfigUpdated,
    /// The bootstrap configuration changed.
    BootstrapConfigUpdated,
    /// A message of a kind this client does not understand, named by its type.
    Unrecognized(String),
}

/// Whether the update stream is currently established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The stream was opened.
    Connected,
    /// The stream was closed after having been opened.
    Disconnected,
}

/// An event delivered to every watcher of a
/// [`SubscriptionEngine`](super::SubscriptionEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The cluster configuration changed.
    ConfigUpdated,
    /// The bootstrap configuration changed.
    BootstrapConfigUpdated,
    /// The bundle with the given key changed.
    BundleUpdated(String),
}

impl DispatchEvent {
    /// Bundle key affected by this event, if any.
    ///
    /// A configuration update counts as an update of the `config` bundle.
    pub fn bundle_key(&self) -> Option<&str> {
        match self {
            Self::ConfigUpdated => Some(CONFIG_BUNDLE_KEY),
            Self::BundleUpdated(key) => Some(key),
            Self::StateChanged(_) | Self::BootstrapConfigUpdated => None,
        }
    }

    pub(super) const fn label(&self) -> &'static str {
        match self {
            Self::StateChanged(ConnectionState::Connected) => "connected",
            Self::StateChanged(ConnectionState::Disconnected) => "disconnected",
            Self::ConfigUpdated => "config_updated",
            Self::BootstrapConfigUpdated => "bootstrap_config_updated",
            Self::BundleUpdated(_) => "bundle_updated",
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a [`SubscriptionEngine`](super::SubscriptionEngine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Not connected; either not started yet or waiting out a backoff.
    Idle,
    /// Obtaining a token and opening the stream.
    Connecting,
    /// Receiving frames.
    Streaming,
    /// Notifying watchers that the stream closed.
    Disconnecting,
    /// Stopped for good; see [`SubscriptionEngine::wait`](super::SubscriptionEngine::wait).
    Stopped,
}
