//! Shared service state handed to every request handler.

use crate::server::{
    config::ServerConfig,
    telemetry::{decrement_sessions_inflight, increment_sessions_inflight},
};
use core::time::Duration;
use genserve_core::{Error, Result, engine::GenerationEngine};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Engine handle, configuration and lifecycle state for the HTTP service.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn GenerationEngine>,
    config: ServerConfig,
    /// Parent of every session's cancellation token.
    shutdown_token: CancellationToken,
    serving: AtomicBool,
    inflight: AtomicUsize,
}

impl ServiceContext {
    pub fn new(engine: Arc<dyn GenerationEngine>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                shutdown_token: CancellationToken::new(),
                serving: AtomicBool::new(true),
                inflight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn GenerationEngine> {
        &self.inner.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown_token
    }

    pub fn is_serving(&self) -> bool {
        self.inner.serving.load(Ordering::Acquire)
    }

    /// Number of sessions currently admitted and not yet finished.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Reserves an in-flight slot for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn begin(&self) -> Result<InflightGuard> {
        if !self.is_serving() {
            return Err(Error::ServiceShutdown);
        }
        self.inner.inflight.fetch_add(1, Ordering::AcqRel);
        increment_sessions_inflight();
        Ok(InflightGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stops admitting sessions, waits for in-flight ones to finish and
    /// cancels whatever is left once `shutdown_timeout` elapses.
    pub async fn shutdown(&self) {
        tracing::info!("Refusing new requests");
        self.inner.serving.store(false, Ordering::Release);

        tracing::info!("Draining in-flight sessions ({} active)", self.inflight());
        let drain_result = timeout(self.inner.config.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All in-flight sessions drained successfully"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} sessions still active)",
                self.inflight()
            ),
        }

        tracing::debug!("Cancelling remaining sessions");
        self.inner.shutdown_token.cancel();
    }
}

/// Releases an in-flight slot when dropped.
pub struct InflightGuard {
    inner: Arc<Inner>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inner.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_sessions_inflight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, future::BoxFuture};
    use genserve_core::{engine::OutputStream, sampling::SamplingParams, types::RequestId};

    struct NoEngine;

    impl GenerationEngine for NoEngine {
        fn submit(&self, _: RequestId, _: String, _: SamplingParams) -> Result<OutputStream> {
            Err(Error::ServiceShutdown)
        }

        fn abort(&self, _: RequestId) -> BoxFuture<'_, ()> {
            futures::future::ready(()).boxed()
        }
    }

    fn context(shutdown_timeout: Duration) -> ServiceContext {
        ServiceContext::new(
            Arc::new(NoEngine),
            ServerConfig {
                shutdown_timeout,
                ..ServerConfig::default()
            },
        )
    }

    #[test]
    fn guards_track_inflight_sessions() {
        let ctx = context(Duration::ZERO);
        let a = ctx.begin().unwrap();
        let b = ctx.clone().begin().unwrap();
        assert_eq!(ctx.inflight(), 2);
        drop(a);
        drop(b);
        assert_eq!(ctx.inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_sessions() {
        let ctx = context(Duration::ZERO);
        ctx.shutdown().await;
        assert!(!ctx.is_serving());
        assert!(ctx.shutdown_token().is_cancelled());
        assert!(matches!(ctx.begin(), Err(Error::ServiceShutdown)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_drain_before_cancelling() {
        let ctx = context(Duration::from_secs(5));
        let guard = ctx.begin().unwrap();

        let shutdown = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.shutdown().await }
        });

        sleep(Duration::from_secs(1)).await;
        assert!(!ctx.is_serving());
        assert!(!ctx.shutdown_token().is_cancelled());

        drop(guard);
        shutdown.await.unwrap();
        assert!(ctx.shutdown_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_after_timeout() {
        let ctx = context(Duration::from_secs(2));
        let _guard = ctx.begin().unwrap();
        ctx.shutdown().await;
        assert!(ctx.shutdown_token().is_cancelled());
        assert_eq!(ctx.inflight(), 1);
    }
}
