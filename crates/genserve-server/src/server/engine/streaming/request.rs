use crate::server::engine::registry::Registration;
use genserve_core::{
    Result,
    sampling::SamplingParams,
    types::{RequestId, RequestOutput},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A message sent from the worker pool to an individual worker task.
///
/// [`WorkRequest`]s are sent over bounded asynchronous channels and are
/// consumed by the worker's main event loop.
#[derive(Debug)]
pub enum WorkRequest {
    /// Run one generation to completion, streaming cumulative outputs.
    Generate(GenerateJob),

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   completed its shutdown routine.
    Shutdown { response: oneshot::Sender<()> },
}

/// Everything a worker needs to run one request.
#[derive(Debug)]
pub struct GenerateJob {
    pub id: RequestId,
    pub prompt: String,
    pub params: SamplingParams,
    /// Output channel feeding the request's [`OutputStream`].
    ///
    /// [`OutputStream`]: genserve_core::engine::OutputStream
    pub tx: mpsc::Sender<Result<RequestOutput>>,
    /// Cancelled by `abort` or engine shutdown.
    pub cancelled: CancellationToken,
    /// Keeps the id registered until the job is dropped.
    pub registration: Registration,
}
