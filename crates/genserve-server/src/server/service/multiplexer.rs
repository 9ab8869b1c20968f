//! Routing of a session's outputs to the client.
//!
//! - [`stream`]: one `<json>\0` chunk per engine output, pushed through a
//!   bounded channel into the HTTP body.
//! - [`accumulate`]: drains the session, keeps only the latest output and
//!   returns it as a single [`ResponsePayload`].
//!
//! Both paths cancel the session when the client goes away, and never deliver
//! anything after the session's cancellation has been observed.

use super::{
    disconnect::{DisconnectMonitor, TransportGuard},
    session::{GenerationSession, SessionState},
};
use crate::server::telemetry::{increment_chunks_streamed, increment_session_errors};
use bytes::Bytes;
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use genserve_core::{Error, Result, types::ResponsePayload};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Body stream of a streaming response.
///
/// Owns the request's [`TransportGuard`], so dropping the body (client gone,
/// connection reset) is what signals the disconnect.
pub struct ChunkStream {
    inner: ReceiverStream<Result<Bytes>>,
    _transport: TransportGuard,
}

impl Stream for ChunkStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Starts forwarding `session`'s outputs as serialized chunks.
///
/// At most `buffer` chunks are produced ahead of what the body has handed to
/// the transport. The forwarding task ends when the engine is exhausted, the
/// session is cancelled, or the client disconnects, and always finishes by
/// cancelling the session (a no-op if it already completed). An engine error
/// is yielded as the body's final item, which aborts the transfer.
pub fn stream(
    session: GenerationSession,
    monitor: DisconnectMonitor,
    transport: TransportGuard,
    buffer: usize,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(buffer);

    tokio::spawn(forward_chunks(session, monitor, tx).in_current_span());

    ChunkStream {
        inner: ReceiverStream::new(rx),
        _transport: transport,
    }
}

async fn forward_chunks(
    mut session: GenerationSession,
    monitor: DisconnectMonitor,
    tx: mpsc::Sender<Result<Bytes>>,
) {
    let handle = session.cancel_handle();
    let mut chunks = 0_usize;

    loop {
        let next = tokio::select! {
            biased;
            () = monitor.disconnected() => {
                tracing::debug!("Client disconnected after {chunks} chunks");
                break;
            }
            () = tx.closed() => {
                tracing::debug!("Response body dropped after {chunks} chunks");
                break;
            }
            next = session.next() => next,
        };

        match next {
            Some(Ok(output)) => {
                let chunk = match ResponsePayload::from(&output).to_chunk() {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        increment_session_errors();
                        tracing::error!("{e}");
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                };
                if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                    tracing::debug!("Response body dropped after {chunks} chunks");
                    break;
                }
                chunks += 1;
                increment_chunks_streamed();
            }
            Some(Err(e)) => {
                increment_session_errors();
                tracing::error!("Streaming session failed: {e}");
                let _ = tx.send(Err(e)).await;
                break;
            }
            None => {
                tracing::debug!("Stream finished after {chunks} chunks");
                break;
            }
        }
    }

    handle.cancel().await;
}

/// Consumes `session` to the end and returns the latest output.
///
/// Client liveness is checked before each output is awaited and while
/// waiting for it.
///
/// # Errors
///
/// - [`Error::ClientDisconnected`] if the client went away; the session is
///   cancelled first.
/// - [`Error::ServiceShutdown`] if the session was cancelled by shutdown.
/// - [`Error::EmptyResult`] if the engine finished without any output.
/// - Any engine error, unchanged.
pub async fn accumulate(
    mut session: GenerationSession,
    monitor: DisconnectMonitor,
) -> Result<ResponsePayload> {
    let handle = session.cancel_handle();
    let mut last = None;

    loop {
        if !monitor.is_connected() {
            handle.cancel().await;
            return Err(Error::ClientDisconnected);
        }

        let next = tokio::select! {
            biased;
            () = monitor.disconnected() => {
                handle.cancel().await;
                return Err(Error::ClientDisconnected);
            }
            next = session.next() => next,
        };

        match next {
            Some(Ok(output)) => last = Some(output),
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    // `next()` also returns `None` when the token fires; only a `Completed`
    // session ran to the end.
    if session.state() != SessionState::Completed {
        handle.cancel().await;
        if !monitor.is_connected() {
            return Err(Error::ClientDisconnected);
        }
        return Err(Error::ServiceShutdown);
    }

    last.map(|output| ResponsePayload::from(&output))
        .ok_or(Error::EmptyResult)
}
