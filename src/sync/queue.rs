//! Offline Queue Module - Durable Pending Mutations
//!
//! Local mutations land here first and stay until the remote acknowledges
//! them. The queue survives process restarts: its full state is flushed to
//! the persistence collaborator after every mutating call.
//!
//! Features:
//! - FIFO ordering for items never requeued
//! - Requeued items keep their original enqueue timestamp and move to the back
//! - Size cap with oldest-first eviction, reported through a running total
//! - Non-destructive batch draining (items are removed only on ack)

use super::models::SyncQueueItem;
use crate::db::{StateStore, StateStoreExt, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

const QUEUE_KEY: &str = "sync.queue";

// ============================================================================
// Outcomes
// ============================================================================

/// Result of an enqueue, including how many old items the cap pushed out
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub id: String,
    pub evicted: usize,
}

/// Result of requeueing a failed item
#[derive(Debug)]
pub enum RequeueOutcome {
    /// Item moved to the back with an incremented retry count
    Requeued,
    /// Retry budget exhausted; the item was dropped and is returned for
    /// reporting
    Exhausted(SyncQueueItem),
}

// ============================================================================
// Durable Queue
// ============================================================================

/// Persisted queue state
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    items: VecDeque<SyncQueueItem>,
    evicted_total: u64,
}

/// Append-only, crash-recoverable log of pending local mutations.
///
/// Owned exclusively by the orchestrator; readers observe counts through
/// `SyncStatus`.
pub struct DurableQueue {
    items: VecDeque<SyncQueueItem>,
    cap: usize,
    evicted_total: u64,
    store: Arc<dyn StateStore>,
}

impl DurableQueue {
    /// Restore the queue from persistence (empty when nothing was saved)
    pub fn load(store: Arc<dyn StateStore>, cap: usize) -> Result<Self, QueueError> {
        let persisted: PersistedQueue = store.get_json(QUEUE_KEY)?.unwrap_or_default();

        if !persisted.items.is_empty() {
            log::info!("Restored {} pending queue items", persisted.items.len());
        }

        Ok(Self {
            items: persisted.items,
            cap,
            evicted_total: persisted.evicted_total,
            store,
        })
    }

    /// Append an item, evicting the oldest entries if the cap is exceeded
    pub fn enqueue(&mut self, item: SyncQueueItem) -> Result<EnqueueReceipt, QueueError> {
        let id = item.id.clone();
        log::debug!("Enqueue {} ({})", item.entity, item.operation.as_str());

        self.items.push_back(item);

        let mut evicted = 0;
        while self.items.len() > self.cap {
            if let Some(oldest) = self.items.pop_front() {
                log::warn!("Queue cap {} exceeded, evicting {}", self.cap, oldest.entity);
                evicted += 1;
            }
        }
        self.evicted_total += evicted as u64;

        self.flush()?;
        Ok(EnqueueReceipt { id, evicted })
    }

    /// Non-destructive peek at the next batch, front to back
    pub fn drain(&self, max_batch: usize) -> Vec<SyncQueueItem> {
        self.items.iter().take(max_batch).cloned().collect()
    }

    /// Remove acknowledged items by id
    pub fn remove(&mut self, ids: &[String]) -> Result<usize, QueueError> {
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.id));
        let removed = before - self.items.len();

        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Put a failed item back: bump its retry count, keep its original
    /// `enqueued_at`, move it to the back. Items over budget are dropped and
    /// returned for reporting.
    pub fn requeue(&mut self, item: SyncQueueItem) -> Result<RequeueOutcome, QueueError> {
        let mut item = item;
        self.items.retain(|existing| existing.id != item.id);
        item.retry_count += 1;

        if item.budget_exhausted() {
            log::warn!(
                "Item {} for {} exhausted its retry budget ({}/{})",
                item.id,
                item.entity,
                item.retry_count,
                item.max_retries
            );
            self.flush()?;
            return Ok(RequeueOutcome::Exhausted(item));
        }

        log::debug!(
            "Requeued {} (attempt {}/{})",
            item.entity,
            item.retry_count + 1,
            item.max_retries
        );
        self.items.push_back(item);
        self.flush()?;
        Ok(RequeueOutcome::Requeued)
    }

    /// Drop everything (force push/pull replaces queued mutations wholesale)
    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.items.clear();
        self.flush()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Running total of cap evictions, surfaced in `SyncStatus`
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    fn flush(&self) -> Result<(), QueueError> {
        let persisted = PersistedQueue {
            items: self.items.clone(),
            evicted_total: self.evicted_total,
        };
        self.store.put_json(QUEUE_KEY, &persisted)?;
        Ok(())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// Tests
// ============================================================================
