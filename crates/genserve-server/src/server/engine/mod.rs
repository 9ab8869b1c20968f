//! Built-in replay engine.
//!
//! [`ReplayEngine`] implements [`GenerationEngine`] without running a model:
//! each candidate replays words from the prompt, one per step, on a pool of
//! worker tasks. It exists so the binary is runnable end to end and exercises
//! the same submit/abort contract a real engine would.
//!
//! ## Structure
//!
//! - [`pool`] - round-robin worker pool and the worker loop.
//! - [`streaming`] - work messages and per-request generation.
//! - [`registry`] - live request ids, used to route `abort`.

pub mod pool;
pub mod registry;
pub mod streaming;

use crate::server::config::ServerConfig;
use futures::{FutureExt, StreamExt, future::BoxFuture};
use genserve_core::{
    Result,
    engine::{GenerationEngine, OutputStream},
    sampling::SamplingParams,
    types::RequestId,
};
use pool::manager::WorkerPool;
use registry::Registry;
use std::sync::Arc;
use streaming::request::{GenerateJob, WorkRequest};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Outputs a worker may produce ahead of the session consuming them.
const OUTPUT_BUFFER: usize = 1;

pub struct ReplayEngine {
    pool: WorkerPool,
    registry: Arc<Registry>,
    shutdown_token: CancellationToken,
}

impl ReplayEngine {
    /// Spawns the worker pool described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &ServerConfig) -> Self {
        let shutdown_token = CancellationToken::new();
        let pool = WorkerPool::spawn(
            config.num_workers,
            config.queue_depth,
            config.token_interval,
            shutdown_token.clone(),
        );
        Self {
            pool,
            registry: Registry::new(),
            shutdown_token,
        }
    }

    /// Number of requests currently queued or running.
    pub fn live_requests(&self) -> usize {
        self.registry.len()
    }

    /// Aborts all work and stops the workers.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl GenerationEngine for ReplayEngine {
    fn submit(&self, id: RequestId, prompt: String, params: SamplingParams) -> Result<OutputStream> {
        let (cancelled, registration) = self.registry.register(id, &self.shutdown_token)?;
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);

        self.pool.try_send_to_next_worker(WorkRequest::Generate(GenerateJob {
            id,
            prompt,
            params,
            tx,
            cancelled,
            registration,
        }))?;

        tracing::trace!("Queued {id}");
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn abort(&self, id: RequestId) -> BoxFuture<'_, ()> {
        if self.registry.abort(id) {
            tracing::debug!("Aborted {id}");
        } else {
            tracing::trace!("Abort for unknown or finished {id}");
        }
        futures::future::ready(()).boxed()
    }
}
