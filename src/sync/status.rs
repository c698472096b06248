//! Sync Status Store - Observable Engine State
//!
//! Process-wide record of the current sync state. Single-writer: only the
//! orchestrator mutates it, through `update`. Every transition is persisted
//! and then delivered to subscribers synchronously, one transition at a
//! time - observers can rely on seeing an intermediate conflict state before
//! the cycle returns to idle.

use super::models::SyncStatus;
use crate::db::{StateStore, StateStoreExt, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const STATUS_KEY: &str = "sync.status";

type StatusListener = Box<dyn Fn(&SyncStatus) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Observable, persisted sync status
pub struct StatusStore {
    inner: Mutex<SyncStatus>,
    listeners: Mutex<Vec<(u64, StatusListener)>>,
    next_id: AtomicU64,
    store: Arc<dyn StateStore>,
}

impl StatusStore {
    /// Restore persisted status; transient flags reset so a restart resumes
    /// cleanly (a process cannot still be syncing after it died).
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, StoreError> {
        let mut status: SyncStatus = store.get_json(STATUS_KEY)?.unwrap_or_default();
        status.is_syncing = false;
        status.state = super::models::SyncState::Idle;

        Ok(Self {
            inner: Mutex::new(status),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            store,
        })
    }

    /// Read-only snapshot of the current status
    pub fn get(&self) -> SyncStatus {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply one state transition: mutate, persist, notify.
    ///
    /// Orchestrator-only. Listeners run synchronously before this returns;
    /// transitions are never batched.
    pub(crate) fn update<F>(&self, patch: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SyncStatus),
    {
        let snapshot = {
            let mut status = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            patch(&mut status);
            self.store.put_json(STATUS_KEY, &*status)?;
            status.clone()
        };

        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (_, listener) in listeners.iter() {
            listener(&snapshot);
        }

        Ok(())
    }

    /// Register a listener invoked after every transition
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Box::new(listener)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(listener_id, _)| *listener_id != id.0);
    }

    /// Drop every listener; part of engine teardown
    pub(crate) fn clear_listeners(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::sync::models::SyncState;

    fn create_store() -> (StatusStore, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        (StatusStore::load(store.clone()).unwrap(), store)
    }

    #[test]
    fn test_default_status() {
        let (status_store, _) = create_store();
        let status = status_store.get();
        assert_eq!(status.state, SyncState::Idle);
        assert!(!status.is_syncing);
    }

    #[test]
    fn test_update_persists_and_restores() {
        let (status_store, store) = create_store();

        status_store
            .update(|s| {
                s.is_enabled = true;
                s.pending_count = 3;
            })
            .unwrap();

        // New instance over the same persistence sees the update
        let restored = StatusStore::load(store).unwrap();
        let status = restored.get();
        assert!(status.is_enabled);
        assert_eq!(status.pending_count, 3);
    }

    #[test]
    fn test_restart_resets_transient_flags() {
        let (status_store, store) = create_store();

        status_store
            .update(|s| {
                s.is_syncing = true;
                s.state = SyncState::Syncing;
            })
            .unwrap();

        let restored = StatusStore::load(store).unwrap();
        let status = restored.get();
        assert!(!status.is_syncing);
        assert_eq!(status.state, SyncState::Idle);
    }

    #[test]
    fn test_listeners_see_every_transition_in_order() {
        let (status_store, _) = create_store();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        status_store.subscribe(move |status| {
            seen_clone.lock().unwrap().push(status.state);
        });

        status_store.update(|s| s.state = SyncState::Syncing).unwrap();
        status_store.update(|s| s.state = SyncState::Conflict).unwrap();
        status_store.update(|s| s.state = SyncState::Idle).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncState::Syncing, SyncState::Conflict, SyncState::Idle]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let (status_store, _) = create_store();

        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let id = status_store.subscribe(move |_| {
            *count_clone.lock().unwrap() += 1;
        });

        status_store.update(|s| s.pending_count = 1).unwrap();
        status_store.unsubscribe(id);
        status_store.update(|s| s.pending_count = 2).unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_clear_listeners() {
        let (status_store, _) = create_store();

        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        status_store.subscribe(move |_| {
            *count_clone.lock().unwrap() += 1;
        });

        status_store.clear_listeners();
        status_store.update(|s| s.pending_count = 1).unwrap();

        assert_eq!(*count.lock().unwrap(), 0);
    }
}
