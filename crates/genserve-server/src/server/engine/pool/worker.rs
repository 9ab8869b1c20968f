use crate::server::engine::streaming::{processor::handle_generate_request, request::WorkRequest};
use core::time::Duration;
use tokio::sync::mpsc;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Jobs are run one at a time in arrival order; queued jobs wait in the
/// worker's bounded channel. Runs until a [`WorkRequest::Shutdown`] is
/// received or every sender is dropped.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used for logs).
/// - `rx`: Receiver through which [`WorkRequest`]s are received.
/// - `step_delay`: Pause between generation steps.
pub async fn worker_loop(worker_id: usize, mut rx: mpsc::Receiver<WorkRequest>, step_delay: Duration) {
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Generate(job) => {
                handle_generate_request(worker_id, job, step_delay).await;
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
