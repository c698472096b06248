//! Sync Module - Cross-Device State Synchronization
//!
//! Offline-first sync engine for a single user's multi-device state
//! (favorites, layouts, preferences, watch history, profile fields).
//!
//! Architecture:
//! - Durable queue: local mutations survive restarts until acknowledged
//! - Eventual consistency: devices converge after sync, no real-time agreement
//! - Conflict resolution: three-way detection with merge, remote-wins,
//!   local-wins, or caller-prompt strategies
//! - Single orchestrator: one sync in flight, observable status, synchronous
//!   event delivery

pub mod conflict;
pub mod engine;
pub mod events;
pub mod gateway;
pub mod history;
pub mod models;
pub mod network;
pub mod queue;
pub mod retry;
pub mod status;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use models::{
    Clock, ConflictRecord, ConflictStrategy, EntityKey, EntityKind, MergeKind, Operation,
    Platform, Resolution, Snapshot, SnapshotEntry, SyncConfig, SyncQueueItem, SyncState,
    SyncStatus, SyncStrategy, SystemClock,
};

pub use conflict::{detect, resolve, ConflictPrompt, Detection};
pub use engine::{SyncEngine, SyncError};
pub use events::{EventBus, EventSubscriptionId, SyncEvent, SyncEventKind};
pub use gateway::{
    GatewayError, HttpGateway, RemoteGateway, RemoteSnapshot, UploadAck, UploadBatch,
};
pub use history::{HistoryEntry, HistoryError, SyncHistory, SyncOperation};
pub use network::{ManualNetworkMonitor, NetworkMonitor, NetworkState};
pub use queue::{DurableQueue, EnqueueReceipt, QueueError, RequeueOutcome};
pub use retry::RetryPolicy;
pub use status::{StatusStore, SubscriptionId};
