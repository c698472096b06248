//! Sync Data Models - Client-Side Structures
//!
//! Defines the data structures shared across the sync engine:
//!
//! Data Categories:
//! - SyncConfig: engine settings and device identity
//! - EntityKind / EntityKey: the synchronizable collections
//! - SyncQueueItem: one pending local mutation
//! - Snapshot / SnapshotEntry: point-in-time view of synchronizable state
//! - ConflictRecord / Resolution: detected divergences and their outcomes
//! - SyncStatus: process-wide observable engine state

use super::network::NetworkState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Entity Model
// ============================================================================

/// Logical collections synchronized across devices.
///
/// Closed enum for this deployment; adding a kind means deciding its merge
/// schema here as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// The user's favorited streams (single ordered collection)
    Favorites,
    /// A named multi-stream grid layout
    Layout,
    /// App preferences (theme, quality, chat visibility, ...)
    Preferences,
    /// Recently watched streams
    WatchHistory,
    /// Public profile fields (display name, avatar)
    Profile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Favorites => "favorites",
            EntityKind::Layout => "layout",
            EntityKind::Preferences => "preferences",
            EntityKind::WatchHistory => "watch_history",
            EntityKind::Profile => "profile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "favorites" => Some(EntityKind::Favorites),
            "layout" => Some(EntityKind::Layout),
            "preferences" => Some(EntityKind::Preferences),
            "watch_history" => Some(EntityKind::WatchHistory),
            "profile" => Some(EntityKind::Profile),
            _ => None,
        }
    }

    /// Merge schema applied when both sides changed and the strategy allows
    /// an automatic merge.
    pub fn merge_kind(&self) -> MergeKind {
        match self {
            EntityKind::Favorites => MergeKind::OrderedSet { identity: "id" },
            EntityKind::WatchHistory => MergeKind::OrderedSet { identity: "id" },
            EntityKind::Layout => MergeKind::KeyedMap,
            EntityKind::Preferences => MergeKind::KeyedMap,
            EntityKind::Profile => MergeKind::Scalar,
        }
    }
}

/// Merge schema for an entity kind.
///
/// Selected by entity schema, not by runtime type inspection; a payload that
/// does not match its declared shape falls back to remote-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Opaque scalar value; remote wins on conflict
    Scalar,
    /// JSON array of objects, unioned by the named identity field
    OrderedSet { identity: &'static str },
    /// JSON object, shallow-merged with remote precedence per key
    KeyedMap,
}

/// Addresses one synchronizable entity (`layout:default`, `favorites:default`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    /// Canonical string form used as the snapshot key
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        Some(Self {
            kind: EntityKind::parse(kind)?,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

// ============================================================================
// Queue Items
// ============================================================================

/// Local mutation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// One pending local mutation, durable until acknowledged by the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique item id; the server deduplicates retried uploads on it
    pub id: String,
    pub operation: Operation,
    pub entity: EntityKey,
    /// Opaque serialized entity data
    pub payload: Value,
    /// Set once at enqueue time; preserved across requeues
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl SyncQueueItem {
    pub fn new(
        operation: Operation,
        entity: EntityKey,
        payload: Value,
        enqueued_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            entity,
            payload,
            enqueued_at,
            retry_count: 0,
            max_retries,
        }
    }

    /// True once the retry budget is spent; the item must be dropped and
    /// reported, never retried again.
    pub fn budget_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// One entity's value at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

/// Full point-in-time view of synchronizable state, keyed by
/// [`EntityKey::storage_key`]. Used for the local state, the remote state,
/// and the last-synced baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &str) -> Option<&SnapshotEntry> {
        self.entries.get(key)
    }

    pub fn upsert(&mut self, key: String, entry: SnapshotEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<SnapshotEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Conflicts
// ============================================================================

/// Outcome chosen for a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    UseLocal,
    UseRemote,
    Merged,
}

/// One detected divergence between local and remote state.
///
/// `local_value`/`remote_value` are `Value::Null` when the entity is absent
/// on that side (e.g. a remote deletion conflicting with a local edit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity: EntityKey,
    pub local_value: Value,
    pub remote_value: Value,
    pub local_timestamp: Option<DateTime<Utc>>,
    pub remote_timestamp: Option<DateTime<Utc>>,
    /// Set by the resolver; `None` while the conflict is pending
    pub resolution: Option<Resolution>,
    /// Populated when `resolution == Merged`
    pub merged_value: Option<Value>,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Value to apply locally once resolved.
    ///
    /// Outer `None`: still unresolved. Inner `None`: the entity was deleted
    /// on the winning side.
    pub fn resolved_value(&self) -> Option<Option<&Value>> {
        match self.resolution? {
            Resolution::UseLocal => Some(non_null(&self.local_value)),
            Resolution::UseRemote => Some(non_null(&self.remote_value)),
            Resolution::Merged => Some(self.merged_value.as_ref()),
        }
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

// ============================================================================
// Sync Status
// ============================================================================

/// How the engine handles detected conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Resolve conflicts with the configured [`ConflictStrategy`]
    Automatic,
    /// Leave conflicts pending for explicit `resolve_conflict` calls
    Manual,
    /// Delegate conflicts to the registered resolver callback
    PromptOnConflict,
}

/// Policy applied under [`SyncStrategy::Automatic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the local version (discard remote changes)
    UseLocal,
    /// Keep the remote version (discard local changes)
    UseRemote,
    /// Merge both versions via each entity kind's merge schema
    Merge,
}

/// Current orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Completed,
    Failed,
    Conflict,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
            SyncState::Conflict => "conflict",
        }
    }
}

/// Process-wide sync state, mutated only by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_enabled: bool,
    pub is_syncing: bool,
    pub state: SyncState,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    /// Items evicted because the queue cap was exceeded
    pub evicted_count: u64,
    /// Items dropped permanently (retry budget exhausted or corrupt payload)
    pub dropped_count: u64,
    pub conflicts: Vec<ConflictRecord>,
    pub strategy: SyncStrategy,
    pub network: NetworkState,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_enabled: false,
            is_syncing: false,
            state: SyncState::Idle,
            last_sync_at: None,
            pending_count: 0,
            evicted_count: 0,
            dropped_count: 0,
            conflicts: Vec::new(),
            strategy: SyncStrategy::Automatic,
            network: NetworkState::Offline,
        }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Platform identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Ios,
    Android,
}

impl Platform {
    /// Get current platform
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        return Platform::Windows;

        #[cfg(target_os = "macos")]
        return Platform::MacOS;

        #[cfg(target_os = "ios")]
        return Platform::Ios;

        #[cfg(target_os = "android")]
        return Platform::Android;

        #[cfg(not(any(
            target_os = "windows",
            target_os = "macos",
            target_os = "ios",
            target_os = "android"
        )))]
        return Platform::Linux;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

/// Get default device name from hostname
fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| format!("{} Device", Platform::current().as_str()))
}

/// Engine configuration and device identity.
///
/// Persisted so a device keeps its identity and tuning across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Unique device identifier (UUID v4, generated once)
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,

    /// Periodic sync interval in seconds
    pub sync_interval_secs: u64,
    /// Quiet window after a burst of local mutations before auto-syncing
    pub debounce_window_ms: u64,
    /// Queue size cap; overflow evicts the oldest items
    pub queue_cap: usize,
    /// Retry budget per queue item
    pub max_retries: u32,
    /// Max items drained per sync cycle
    pub batch_size: usize,
    /// Upper bound on a single upload/download call
    pub request_timeout_secs: u64,
    /// Policy applied when the strategy is `Automatic`
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: default_device_name(),
            platform: Platform::current(),
            sync_interval_secs: 300,
            debounce_window_ms: 2000,
            queue_cap: 500,
            max_retries: 5,
            batch_size: 50,
            request_timeout_secs: 30,
            conflict_strategy: ConflictStrategy::Merge,
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Time source injected into the engine so tests can control timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Tests
// ============================================================================
