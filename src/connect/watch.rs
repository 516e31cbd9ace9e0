use super::events::{ConnectionState, DispatchEvent};
use crate::constants::CONFIG_BUNDLE_KEY;

/// Callbacks invoked by [`SubscriptionEngine::watch_with`](super::SubscriptionEngine::watch_with).
///
/// Every method defaults to a no-op. Handlers run on the watching task one event at a time;
/// a slow handler delays later events for this watcher only.
pub trait WatchHandlers: Send {
    /// The update stream was opened.
    fn on_connected(&mut self) {}

    /// The update stream was closed.
    fn on_disconnected(&mut self) {}

    /// The cluster configuration changed.
    fn on_config_updated(&mut self) {}

    /// The bootstrap configuration changed.
    fn on_bootstrap_config_updated(&mut self) {}

    /// The bundle with the given key changed.
    ///
    /// Also called with `"config"` after [`WatchHandlers::on_config_updated`].
    fn on_bundle_updated(&mut self, _key: &str) {}

    /// Routes one event to the matching callbacks.
    fn dispatch(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::StateChanged(ConnectionState::Connected) => self.on_connected(),
            DispatchEvent::StateChanged(ConnectionState::Disconnected) => self.on_disconnected(),
            DispatchEvent::ConfigUpdated => {
                self.on_config_updated();
                self.on_bundle_updated(CONFIG_BUNDLE_KEY);
            }
            DispatchEvent::BootstrapConfigUpdated => self.on_bootstrap_config_updated(),
            DispatchEvent::BundleUpdated(key) => self.on_bundle_updated(key),
        }
    }
}
