//! Generation sessions.
//!
//! A [`GenerationSession`] is one in-flight request: its id, the engine's
//! output stream, and shared cancellation state. The session itself is the
//! single consumer of the stream; a [`CancelHandle`] can be cloned out of it
//! and used from any task.
//!
//! ## State machine
//!
//! ```text
//! Admitted -> Active -> Completed
//!     |          |
//!     +----------+----> Cancelled | Failed
//! ```
//!
//! No transition leaves a terminal state. Transitions are compare-and-swap on
//! a single atomic, so a cancel racing with natural completion has exactly one
//! winner.

use super::context::{InflightGuard, ServiceContext};
use crate::server::telemetry::{increment_cancellations, record_session_duration};
use futures::StreamExt;
use genserve_core::{
    Error, Result,
    engine::{GenerationEngine, OutputStream},
    sampling::SamplingParams,
    types::{RequestId, RequestOutput},
};
use portable_atomic::{AtomicU8, Ordering};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Admitted = 0,
    /// At least one output has been requested from the engine.
    Active = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Admitted,
            1 => Self::Active,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

struct Shared {
    id: RequestId,
    state: AtomicU8,
    token: CancellationToken,
    engine: Arc<dyn GenerationEngine>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next` unless already terminal. Returns whether this call
    /// made the transition.
    fn transition(&self, next: SessionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (!SessionState::from_u8(raw).is_terminal()).then_some(next as u8)
            })
            .is_ok()
    }

    fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Admitted as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Idempotent cancellation handle for a session.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub fn id(&self) -> RequestId {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Cancels the session and asks the engine to abort it.
    ///
    /// Only the first call on a non-terminal session has an effect; every
    /// other call, including any after natural completion, is a no-op.
    pub async fn cancel(&self) {
        if !self.shared.transition(SessionState::Cancelled) {
            return;
        }
        self.shared.token.cancel();
        increment_cancellations();
        tracing::debug!("Cancelling session {}", self.shared.id);
        self.abort().await;
    }

    /// Resolves once the session's token has been cancelled, either through
    /// [`CancelHandle::cancel`] or service shutdown.
    pub async fn cancelled(&self) {
        self.shared.token.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Marks the session failed and releases the engine's work.
    async fn fail(&self) {
        if self.shared.transition(SessionState::Failed) {
            self.shared.token.cancel();
            self.abort().await;
        }
    }

    /// Issues the engine abort on its own task, so it still reaches the
    /// engine if the caller is dropped mid-await. The session is already
    /// terminal here and nothing retries it.
    async fn abort(&self) {
        let engine = Arc::clone(&self.shared.engine);
        let id = self.shared.id;
        let task = tokio::spawn(async move { engine.abort(id).await });
        if let Err(e) = task.await {
            tracing::error!("Abort task for session {id} failed: {e}");
        }
    }
}

/// One in-flight generation request.
pub struct GenerationSession {
    handle: CancelHandle,
    stream: OutputStream,
    last: Option<RequestOutput>,
    started: Instant,
    _inflight: InflightGuard,
}

impl GenerationSession {
    /// Allocates a fresh [`RequestId`] and registers the request with the
    /// engine.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the service is shutting down.
    /// - Whatever the engine's `submit` rejects the request with.
    pub fn admit(ctx: &ServiceContext, prompt: String, params: SamplingParams) -> Result<Self> {
        let inflight = ctx.begin()?;
        let id = RequestId::generate();
        let stream = ctx.engine().submit(id, prompt, params)?;

        Ok(Self {
            handle: CancelHandle {
                shared: Arc::new(Shared {
                    id,
                    state: AtomicU8::new(SessionState::Admitted as u8),
                    token: ctx.shutdown_token().child_token(),
                    engine: Arc::clone(ctx.engine()),
                }),
            },
            stream,
            last: None,
            started: Instant::now(),
            _inflight: inflight,
        })
    }

    pub fn id(&self) -> RequestId {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Pulls the next output from the engine.
    ///
    /// Returns `None` once the engine is exhausted, the session is cancelled,
    /// or the session has reached a terminal state. An output that does not
    /// extend its predecessor fails the session with
    /// [`Error::EngineFailure`]. Cancel-safe.
    pub async fn next(&mut self) -> Option<Result<RequestOutput>> {
        let shared = &self.handle.shared;
        if shared.state().is_terminal() {
            return None;
        }
        shared.activate();

        let item = tokio::select! {
            biased;
            () = shared.token.cancelled() => return None,
            item = self.stream.next() => item,
        };

        match item {
            Some(Ok(output)) => {
                if let Some(prev) = &self.last {
                    if !output.extends(prev) {
                        let err = Error::EngineFailure {
                            context: format!("Session {} received a non-monotonic output", shared.id),
                        };
                        self.handle.fail().await;
                        return Some(Err(err));
                    }
                }
                self.last = Some(output.clone());
                Some(Ok(output))
            }
            Some(Err(err)) => {
                self.handle.fail().await;
                Some(Err(err))
            }
            None => {
                if shared.transition(SessionState::Completed) {
                    tracing::trace!("Session {} completed", shared.id);
                }
                None
            }
        }
    }
}

impl Drop for GenerationSession {
    fn drop(&mut self) {
        record_session_duration(self.started.elapsed().as_secs_f64() * 1000.0);

        // A session abandoned mid-flight still has to release engine work.
        if !self.state().is_terminal() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let handle = self.handle.clone();
                runtime.spawn(async move { handle.cancel().await });
            }
        }
    }
}
