//! In-process fan-out of one event stream to many subscribers.
//!
//! A [`Broadcaster`] delivers every published event to each subscriber registered at publish
//! time, in publish order. Each subscriber has a bounded queue. A publisher waits for a full
//! queue at most [`BroadcastConfig::publish_timeout`]; a subscriber that stays full past that
//! is evicted and its loop ends with [`BroadcastError::Lagged`] instead of silently missing
//! events.

mod broadcaster;
mod errors;

pub use broadcaster::{BroadcastConfig, Broadcaster, Subscription};
pub use errors::{BoxError, BroadcastError};
