//! In-flight registry: opaque correlation ids mapped to single-slot
//! response sinks.
//!
//! Ids are uniform 64-bit randoms, unique only within one transport's
//! lifetime; collisions are retried at allocation. Each entry is removed
//! exactly once — by response arrival, deadline expiry, or transport
//! shutdown.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::protocol::Response;

#[derive(Default)]
pub struct Inflight {
    entries: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and its single-slot sink.
    pub fn register(&self) -> (u64, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut id = rand::random::<u64>();
        while entries.contains_key(&id) {
            id = rand::random::<u64>();
        }
        entries.insert(id, tx);
        (id, rx)
    }

    /// Remove and return the sink for `id`. Single-shot: a second call
    /// with the same id returns `None`.
    pub fn take(&self, id: u64) -> Option<oneshot::Sender<Response>> {
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&id)
    }

    /// Drop the sink for `id`, signaling the waiter that no response will
    /// arrive.
    pub fn unregister(&self, id: u64) {
        let _ = self.take(id);
    }

    /// Snapshot of currently registered ids.
    pub fn keys(&self) -> Vec<u64> {
        let entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        let entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn take_is_single_shot() {
        let inflight = Inflight::new();
        let (id, _rx) = inflight.register();
        assert!(inflight.take(id).is_some());
        assert!(inflight.take(id).is_none());
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn unregister_closes_the_sink() {
        let inflight = Inflight::new();
        let (id, rx) = inflight.register();
        inflight.unregister(id);
        assert!(rx.await.is_err());
    }

    #[test]
    fn ids_are_unique_at_allocation() {
        let inflight = Inflight::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let (id, _rx) = inflight.register();
            assert!(seen.insert(id));
        }
        assert_eq!(inflight.len(), 256);
    }

    #[tokio::test]
    async fn delivery_through_a_taken_sink() {
        let inflight = Inflight::new();
        let (id, rx) = inflight.register();
        let tx = inflight.take(id).unwrap();
        tx.send(Response {
            success: true,
            ..Default::default()
        })
        .unwrap();
        assert!(rx.await.unwrap().success);
    }
}
