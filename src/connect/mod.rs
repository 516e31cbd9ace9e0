//! Reconnecting subscription to the control channel's update stream.
//!
//! [`SubscriptionEngine`] supervises the stream: it obtains a long-lived token, opens the
//! stream through a caller-supplied [`StreamFactory`], fans each frame out to watchers as a
//! [`DispatchEvent`], and reconnects with backoff on retryable failures.
//!
//! # Example
//!
//! ```no_run
//! use cloud_connect::connect::{DispatchEvent, StreamFactory, SubscriptionEngine};
//! use cloud_connect::token::TokenCache;
//! use std::sync::Arc;
//!
//! # async fn example(tokens: Arc<TokenCache>, open: StreamFactory) {
//! let engine = SubscriptionEngine::builder(tokens, open).build();
//! let mut events = engine.watch();
//! engine.start();
//!
//! while let Ok(event) = events.recv().await {
//!     if event == DispatchEvent::ConfigUpdated {
//!         println!("configuration changed");
//!     }
//! }
//! println!("engine stopped: {}", engine.wait().await);
//! # }
//! ```

mod builder;
mod engine;
mod errors;
mod events;
mod metrics;
mod supervisor;
mod types;
mod watch;

pub use builder::{ReconnectConfig, ReconnectPolicy, SubscriptionEngineBuilder};
pub use engine::SubscriptionEngine;
pub use errors::{ConnectError, MetricsErrorKind, StreamError};
pub use events::{ConnectionState, DispatchEvent, EngineState, Frame};
pub use metrics::MetricsRecorder;
pub use types::{FrameStream, StreamFactory, StreamFuture};
pub use watch::WatchHandlers;
