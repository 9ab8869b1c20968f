//! Client disconnect detection.
//!
//! hyper does not surface a "peer went away" event to handlers. Instead, when
//! a connection closes, whatever is driving the response is dropped: the
//! handler future for a blocking request, the response body for a streaming
//! one. A [`TransportGuard`] placed in that owner turns the drop into a
//! cancellation that any number of [`DisconnectMonitor`]s can observe.

use tokio_util::sync::{CancellationToken, DropGuard};

/// Marks the client as gone when dropped.
#[derive(Debug)]
pub struct TransportGuard {
    _guard: DropGuard,
}

/// Observes the liveness of one client connection.
#[derive(Debug, Clone)]
pub struct DisconnectMonitor {
    token: CancellationToken,
}

/// Creates a linked guard/monitor pair for one request.
pub fn transport() -> (TransportGuard, DisconnectMonitor) {
    let token = CancellationToken::new();
    (
        TransportGuard {
            _guard: token.clone().drop_guard(),
        },
        DisconnectMonitor { token },
    )
}

impl DisconnectMonitor {
    /// Non-blocking liveness check.
    pub fn is_connected(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves once the client has disconnected.
    pub async fn disconnected(&self) {
        self.token.cancelled().await;
    }

    /// Forces the monitor into the disconnected state.
    pub fn mark_disconnected(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_the_guard_disconnects() {
        let (guard, monitor) = transport();
        let observer = monitor.clone();
        assert!(monitor.is_connected());
        drop(guard);
        assert!(!monitor.is_connected());
        assert!(!observer.is_connected());
    }

    #[tokio::test]
    async fn disconnected_resolves_after_drop() {
        let (guard, monitor) = transport();
        let waiter = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.disconnected().await }
        });
        drop(guard);
        waiter.await.unwrap();
    }

    #[test]
    fn mark_disconnected_keeps_guard_harmless() {
        let (guard, monitor) = transport();
        monitor.mark_disconnected();
        assert!(!monitor.is_connected());
        drop(guard);
        assert!(!monitor.is_connected());
    }
}
