use super::errors::StreamError;
use super::events::Frame;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

/// An open update stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, StreamError>> + Send + 'static>>;

/// Future returned by a [`StreamFactory`].
pub type StreamFuture = Pin<Box<dyn Future<Output = Result<FrameStream, StreamError>> + Send + 'static>>;

/// Opens the update stream, authenticated with the given bearer token.
pub type StreamFactory = Arc<dyn Fn(String) -> StreamFuture + Send + Sync + 'static>;
