//! Asynchronous worker pool for the replay engine.
//!
//! This module defines the [`WorkerPool`] struct, which manages a set of
//! asynchronous workers responsible for processing [`WorkRequest`]s. It
//! distributes work using round-robin scheduling and supports coordinated
//! shutdown via a shared [`CancellationToken`].
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] and executes jobs
//! independently.

use super::worker::worker_loop;
use crate::server::engine::streaming::request::WorkRequest;
use core::time::Duration;
use genserve_core::Error;
use portable_atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `num_workers` workers, each with a queue of `queue_depth`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        num_workers: usize,
        queue_depth: usize,
        step_delay: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(queue_depth);
            workers.push(tx);
            tokio::spawn(worker_loop(worker_id, rx, step_delay));
        }
        Self::new(workers, shutdown_token)
    }

    /// Constructs a new [`WorkerPool`] from initialized worker channels and a
    /// shared cancellation token.
    pub const fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Enqueues a [`WorkRequest`] on the next worker without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the pool is shutting down.
    /// - [`Error::ServiceOverloaded`] if the chosen worker's queue is full.
    /// - [`Error::ChannelError`] if the worker has stopped.
    pub fn try_send_to_next_worker(&self, request: WorkRequest) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        match self.workers[worker_idx].try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::ServiceOverloaded {
                details: format!("Worker {worker_idx} queue is full"),
            }),
            Err(TrySendError::Closed(_)) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`], aborting running and queued
    ///   jobs.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker.
    /// - Waits (up to 3 seconds per worker) for shutdown acknowledgements.
    pub async fn shutdown(&self) {
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            match timeout(
                SHUTDOWN_ACK_TIMEOUT,
                worker.send(WorkRequest::Shutdown { response: tx }),
            )
            .await
            {
                Ok(Ok(())) => shutdown_handles.push((i, rx)),
                Ok(Err(e)) => tracing::error!("Failed to send shutdown to worker {i}: {e}"),
                Err(_) => tracing::warn!("Worker {i} queue did not accept shutdown in time"),
            }
        }

        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => tracing::trace!("Worker {i} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("Worker {i} returned error: {e}"),
                Err(_) => tracing::warn!("Worker {i} shutdown timed out"),
            }
        });

        futures::future::join_all(timeout_futures).await;

        tracing::info!("Worker pool shutdown complete");
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin() {
        let (a, _ra) = mpsc::channel(1);
        let (b, _rb) = mpsc::channel(1);
        let pool = WorkerPool::new(vec![a, b], CancellationToken::new());
        let picks: Vec<_> = (0..4).map(|_| pool.next_worker_index()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn full_queue_is_overload() {
        let (tx, _rx) = mpsc::channel(1);
        let pool = WorkerPool::new(vec![tx], CancellationToken::new());
        let (ack, _) = oneshot::channel();
        pool.try_send_to_next_worker(WorkRequest::Shutdown { response: ack })
            .unwrap();
        let (ack, _) = oneshot::channel();
        let err = pool
            .try_send_to_next_worker(WorkRequest::Shutdown { response: ack })
            .unwrap_err();
        assert!(matches!(err, Error::ServiceOverloaded { .. }));
    }

    #[test]
    fn refuses_work_after_shutdown_starts() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let pool = WorkerPool::new(vec![tx], token.clone());
        token.cancel();
        let (ack, _) = oneshot::channel();
        assert_eq!(
            pool.try_send_to_next_worker(WorkRequest::Shutdown { response: ack })
                .unwrap_err(),
            Error::ServiceShutdown
        );
    }

    #[test]
    fn closed_worker_is_a_channel_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let pool = WorkerPool::new(vec![tx], CancellationToken::new());
        let (ack, _) = oneshot::channel();
        assert!(matches!(
            pool.try_send_to_next_worker(WorkRequest::Shutdown { response: ack }),
            Err(Error::ChannelError { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_is_acknowledged() {
        let pool = WorkerPool::spawn(2, 4, Duration::ZERO, CancellationToken::new());
        assert_eq!(pool.len(), 2);
        pool.shutdown().await;
        let (ack, _) = oneshot::channel();
        assert_eq!(
            pool.try_send_to_next_worker(WorkRequest::Shutdown { response: ack })
                .unwrap_err(),
            Error::ServiceShutdown
        );
    }
}
