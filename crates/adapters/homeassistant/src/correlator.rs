//! Matches `result` frames to the requests that are waiting for them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::messages::ResultMsg;

/// Pending request registry keyed by request id.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<u64, oneshot::Sender<ResultMsg>>>,
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ResultMsg>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the result of request `id`.
    ///
    /// Must happen before the request is written so a fast reply cannot be
    /// missed.
    pub fn register(&self, id: u64) -> oneshot::Receiver<ResultMsg> {
        let (tx, rx) = oneshot::channel();
        if self.lock().insert(id, tx).is_some() {
            tracing::warn!(id, "replacing pending request with the same id");
        }
        rx
    }

    /// Deliver a result to its waiter. Returns `false` when nobody waits
    /// for it anymore.
    pub fn resolve(&self, result: ResultMsg) -> bool {
        let id = result.id;
        let Some(tx) = self.lock().remove(&id) else {
            tracing::debug!(id, "result without pending request");
            return false;
        };
        tx.send(result).is_ok()
    }

    /// Drop the waiter for `id`, e.g. when writing the request failed.
    pub fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Fail every pending request; their receivers observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
