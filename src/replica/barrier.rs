// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reload barriers.
//!
//! `initialize` waits until the replica has applied the reload triggered by
//! its own `load` announcement. Each call gets a fresh reload id; the id
//! travels as the announcement payload, and the message loop resolves the
//! matching barrier after the reload has been applied and listeners notified.
//!
//! ```text
//! initialize()                       message loop
//!     │ register(id)                      │
//!     │ PUBLISH {op: load, payload: id} ─►│ read store, apply, notify
//!     │ wait(id, timeout) ◄───────────────│ resolve(id, Ok)
//!     ▼                                   ▼
//! ```
//!
//! A barrier resolves exactly once. Concurrent `initialize` calls each wait on
//! their own id, so one call's reload never releases another.

use crate::error::{ReplicaError, Result};
use crate::metrics;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Waiting side of one registered barrier.
pub(crate) struct PendingReload {
    id: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingReload {
    #[cfg(test)]
    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

/// Pending reload barriers for one replica, keyed by reload id.
pub(crate) struct ReloadBarriers {
    topic: String,
    pending: DashMap<String, oneshot::Sender<Result<()>>>,
}

impl ReloadBarriers {
    pub(crate) fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            pending: DashMap::new(),
        }
    }

    /// Register a barrier. Must happen before the announcement is published.
    pub(crate) fn register(&self, id: impl Into<String>) -> PendingReload {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        PendingReload { id, rx }
    }

    /// Complete the barrier for `id`. Returns false if nobody is waiting on it.
    pub(crate) fn resolve(&self, id: &str, result: Result<()>) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => {
                let outcome = if result.is_ok() { "resolved" } else { "failed" };
                metrics::record_barrier_outcome(&self.topic, outcome);
                tx.send(result).is_ok()
            }
            None => false,
        }
    }

    /// Drop a barrier whose announcement never went out.
    pub(crate) fn cancel(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Fail every pending barrier (the subscription is gone).
    pub(crate) fn fail_all(&self, error: impl Fn() -> ReplicaError) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.resolve(&id, Err(error()));
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait for `pending` to resolve, up to `timeout` if one is set.
    pub(crate) async fn wait(&self, pending: PendingReload, timeout: Option<Duration>) -> Result<()> {
        let PendingReload { id, rx } = pending;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.cancel(&id);
                    metrics::record_barrier_outcome(&self.topic, "timeout");
                    warn!(topic = %self.topic, reload_id = %id, ?limit, "Reload barrier timed out");
                    return Err(ReplicaError::ReloadTimeout {
                        topic: self.topic.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        match received {
            Ok(result) => {
                debug!(topic = %self.topic, reload_id = %id, ok = result.is_ok(), "Reload barrier released");
                result
            }
            // Sender dropped: the replica went away underneath us
            Err(_) => Err(ReplicaError::Shutdown),
        }
    }
}
