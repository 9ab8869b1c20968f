//! The generation engine contract.
//!
//! The serving layer only ever talks to an engine through [`GenerationEngine`]:
//! it submits work and receives a lazy [`OutputStream`], and it asks the engine
//! to abort work by [`RequestId`]. Scheduling, batching and model execution are
//! the engine's business.

use crate::{
    Result,
    sampling::SamplingParams,
    types::{RequestId, RequestOutput},
};
use core::pin::Pin;
use futures::{Stream, future::BoxFuture};

/// Lazy, ordered sequence of outputs the engine produces for one request.
///
/// The stream ends when generation finishes naturally or is aborted. An `Err`
/// item is an unrecoverable engine fault; nothing follows it.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<RequestOutput>> + Send>>;

/// A text-generation backend.
pub trait GenerationEngine: Send + Sync + 'static {
    /// Registers a request and returns its result stream.
    ///
    /// Must not wait for generation to start; work proceeds concurrently
    /// inside the engine and is pulled through the returned stream.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot accept the request at all (overloaded, shut
    /// down, duplicate id).
    fn submit(&self, id: RequestId, prompt: String, params: SamplingParams)
    -> Result<OutputStream>;

    /// Asks the engine to stop generating for `id`.
    ///
    /// Unknown or already finished ids are ignored. Safe to call repeatedly.
    fn abort(&self, id: RequestId) -> BoxFuture<'_, ()>;
}
