//! Event Surface - Engine Lifecycle Notifications
//!
//! Consumers (typically the UI) subscribe for sync lifecycle events; they
//! never mutate engine state through this surface. Delivery is a synchronous
//! observer list so event ordering matches the order of state transitions
//! that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Lifecycle event kinds exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    ConflictDetected,
    SettingsChanged,
}

impl SyncEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::SyncStarted => "sync-started",
            SyncEventKind::SyncCompleted => "sync-completed",
            SyncEventKind::SyncFailed => "sync-failed",
            SyncEventKind::ConflictDetected => "conflict-detected",
            SyncEventKind::SettingsChanged => "settings-changed",
        }
    }
}

/// One emitted event with its timestamp and a kind-specific payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSubscriptionId(u64);

/// Synchronous observer list for engine events
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(u64, EventListener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver an event to every listener, synchronously, in subscription
    /// order
    pub(crate) fn emit(&self, event: SyncEvent) {
        log::debug!("Event: {}", event.kind.as_str());

        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (_, listener) in listeners.iter() {
            listener(&event);
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> EventSubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Box::new(listener)));
        EventSubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: EventSubscriptionId) {
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
