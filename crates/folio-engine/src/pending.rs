//! Per-document pending-operation counters for deferred commits.
//!
//! A deferred mutation writes its block versions immediately but leaves the
//! document head alone; the coordinator records it here instead. An entry
//! exists only while operations are outstanding: it is inserted on the
//! first deferred op, removed when a commit absorbs it, or discarded by the
//! staleness sweep. Discarding never creates a revision.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use folio_types::DocumentId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub ops: u64,
    pub first_at: Instant,
    /// Last time an op was recorded. Staleness is measured from here.
    pub touched_at: Instant,
}

/// Concurrency-safe pending counters, one per document.
#[derive(Debug, Default)]
pub struct PendingVersions {
    entries: DashMap<DocumentId, PendingEntry>,
}

impl PendingVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ops` deferred operations for a document.
    pub fn record(&self, doc_id: DocumentId, ops: u64) {
        self.record_at(doc_id, ops, Instant::now());
    }

    fn record_at(&self, doc_id: DocumentId, ops: u64, now: Instant) {
        if ops == 0 {
            return;
        }
        self.entries
            .entry(doc_id)
            .and_modify(|e| {
                e.ops += ops;
                e.touched_at = now;
            })
            .or_insert(PendingEntry {
                ops,
                first_at: now,
                touched_at: now,
            });
    }

    /// Outstanding operations for a document (0 if none).
    pub fn count(&self, doc_id: DocumentId) -> u64 {
        self.entries.get(&doc_id).map(|e| e.ops).unwrap_or(0)
    }

    pub fn get(&self, doc_id: DocumentId) -> Option<PendingEntry> {
        self.entries.get(&doc_id).map(|e| *e)
    }

    /// Remove `ops` that a committed revision now covers. Ops recorded
    /// concurrently after the commit read the counter stay pending.
    pub fn absorb(&self, doc_id: DocumentId, ops: u64) {
        if ops == 0 {
            return;
        }
        if let Entry::Occupied(mut entry) = self.entries.entry(doc_id) {
            if entry.get().ops <= ops {
                entry.remove();
            } else {
                entry.get_mut().ops -= ops;
            }
        }
    }

    /// Number of documents with outstanding operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discard entries untouched for longer than `stale_after`.
    pub fn sweep(&self, stale_after: Duration) -> Vec<DocumentId> {
        self.sweep_at(Instant::now(), stale_after)
    }

    fn sweep_at(&self, now: Instant, stale_after: Duration) -> Vec<DocumentId> {
        let mut discarded = Vec::new();
        self.entries.retain(|doc_id, entry| {
            let stale = now.saturating_duration_since(entry.touched_at) > stale_after;
            if stale {
                warn!(doc = %doc_id, ops = entry.ops, "discarding stale pending operations");
                discarded.push(*doc_id);
            }
            !stale
        });
        discarded
    }

    /// Periodically sweep stale entries on the current tokio runtime.
    ///
    /// The task holds only a weak reference and ends once the counters are
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, stale_after: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(pending) = weak.upgrade() else {
                    debug!("pending counters dropped, sweeper exiting");
                    break;
                };
                let discarded = pending.sweep(stale_after);
                if !discarded.is_empty() {
                    debug!(count = discarded.len(), "pending sweep discarded entries");
                }
            }
        })
    }
}
