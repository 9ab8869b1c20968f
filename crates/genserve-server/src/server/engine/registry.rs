//! Live request registry used to route `abort` calls to running jobs.

use genserve_core::{Error, Result, types::RequestId};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct Registry {
    live: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `id` and returns its cancellation token, derived from
    /// `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineFailure`] if `id` is already live.
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        parent: &CancellationToken,
    ) -> Result<(CancellationToken, Registration)> {
        let mut live = self.live.lock();
        if live.contains_key(&id) {
            return Err(Error::EngineFailure {
                context: format!("Duplicate request id {id}"),
            });
        }
        let token = parent.child_token();
        live.insert(id, token.clone());
        Ok((
            token,
            Registration {
                id,
                registry: Arc::clone(self),
            },
        ))
    }

    /// Cancels the job registered under `id`. Returns `false` for unknown ids.
    pub fn abort(&self, id: RequestId) -> bool {
        match self.live.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    fn remove(&self, id: RequestId) {
        self.live.lock().remove(&id);
    }
}

/// Removes its id from the [`Registry`] when dropped.
#[derive(Debug)]
pub struct Registration {
    id: RequestId,
    registry: Arc<Registry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_cancels_and_forgets() {
        let registry = Registry::new();
        let root = CancellationToken::new();
        let id = RequestId::generate();
        let (token, _registration) = registry.register(id, &root).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.abort(id));
        assert!(token.is_cancelled());
        assert!(!registry.abort(id));
        assert!(!root.is_cancelled());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = Registry::new();
        let root = CancellationToken::new();
        let id = RequestId::generate();
        let _first = registry.register(id, &root).unwrap();
        assert!(matches!(
            registry.register(id, &root),
            Err(Error::EngineFailure { .. })
        ));
    }

    #[test]
    fn dropping_the_registration_unregisters() {
        let registry = Registry::new();
        let root = CancellationToken::new();
        let id = RequestId::generate();
        let (token, registration) = registry.register(id, &root).unwrap();
        drop(registration);
        assert!(registry.is_empty());
        assert!(!registry.abort(id));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn root_cancellation_reaches_jobs() {
        let registry = Registry::new();
        let root = CancellationToken::new();
        let (token, _registration) = registry.register(RequestId::generate(), &root).unwrap();
        root.cancel();
        assert!(token.is_cancelled());
    }
}
