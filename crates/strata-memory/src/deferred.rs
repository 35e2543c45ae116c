//! Queue of deferred enrichment work keyed by chunk id.
//!
//! Ingestion only enqueues; summarisation, fact extraction and embedding run
//! later from [`ChunkManager::run_pending`][crate::ChunkManager::run_pending]
//! or a background worker.  Each chunk has at most one queued task.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use strata_types::ChunkId;
use tokio::sync::Notify;

#[derive(Default)]
struct Queue {
    order: VecDeque<ChunkId>,
    queued: HashSet<ChunkId>,
}

#[derive(Default)]
pub(crate) struct DeferredQueue {
    inner: Mutex<Queue>,
    notify: Notify,
}

impl DeferredQueue {
    /// Enqueue `id` unless it is already waiting, and wake the worker.
    pub(crate) fn push(&self, id: ChunkId) {
        let mut q = self.inner.lock();
        if q.queued.insert(id.clone()) {
            q.order.push_back(id);
        }
        drop(q);
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<ChunkId> {
        let mut q = self.inner.lock();
        let id = q.order.pop_front()?;
        q.queued.remove(&id);
        Some(id)
    }

    /// Drop the queued task for `id`.  Returns whether one was waiting.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        let mut q = self.inner.lock();
        if q.queued.remove(id) {
            q.order.retain(|queued| queued != id);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.inner.lock().queued.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}
