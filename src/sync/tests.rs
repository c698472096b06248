//! Integration Tests for the Sync Engine
//!
//! End-to-end flows against an in-memory fake of the sync service:
//! - offline mutation, reconnect, automatic drain
//! - cross-device conflicts and every resolution strategy
//! - transient failures, backoff retries, budget exhaustion
//! - idempotent upload replay
//! - status/event ordering guarantees

use super::engine::SyncEngine;
use super::gateway::{GatewayError, RemoteGateway, RemoteSnapshot, UploadAck, UploadBatch};
use super::models::{
    ConflictStrategy, EntityKey, EntityKind, Operation, Resolution, Snapshot, SnapshotEntry,
    SyncConfig, SyncState, SyncStrategy,
};
use super::network::{ManualNetworkMonitor, NetworkState};
use super::retry::RetryPolicy;
use crate::db::{MemoryStore, StateStore, StateStoreExt};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

// ============================================================================
// Fake Gateway
// ============================================================================

enum FailKind {
    Transient,
    Unauthorized,
}

struct ServerState {
    snapshot: Snapshot,
    version: i64,
    applied: HashSet<String>,
    upload_calls: usize,
    apply_uploads: bool,
    fail_next_uploads: usize,
    upload_failure: FailKind,
    fail_next_downloads: usize,
}

/// In-memory sync service. Deduplicates uploads on item id, which is the
/// collaborator requirement the engine's retry logic relies on.
struct FakeGateway {
    state: StdMutex<ServerState>,
    delay: Duration,
}

impl FakeGateway {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: StdMutex::new(ServerState {
                snapshot: Snapshot::new(),
                version: 0,
                applied: HashSet::new(),
                upload_calls: 0,
                apply_uploads: true,
                fail_next_uploads: 0,
                upload_failure: FailKind::Transient,
                fail_next_downloads: 0,
            }),
            delay,
        })
    }

    fn set_remote(&self, snapshot: Snapshot, version: i64) {
        let mut state = self.state.lock().unwrap();
        state.snapshot = snapshot;
        state.version = version;
    }

    fn remote_snapshot(&self) -> Snapshot {
        self.state.lock().unwrap().snapshot.clone()
    }

    fn upload_calls(&self) -> usize {
        self.state.lock().unwrap().upload_calls
    }

    fn set_apply_uploads(&self, apply: bool) {
        self.state.lock().unwrap().apply_uploads = apply;
    }

    fn fail_uploads(&self, count: usize, kind: FailKind) {
        let mut state = self.state.lock().unwrap();
        state.fail_next_uploads = count;
        state.upload_failure = kind;
    }

    fn fail_downloads(&self, count: usize) {
        self.state.lock().unwrap().fail_next_downloads = count;
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn upload(&self, batch: &UploadBatch) -> Result<UploadAck, GatewayError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.upload_calls += 1;

        if state.fail_next_uploads > 0 {
            state.fail_next_uploads -= 1;
            return Err(match state.upload_failure {
                FailKind::Transient => GatewayError::Server("injected failure".to_string()),
                FailKind::Unauthorized => GatewayError::Unauthorized,
            });
        }

        let mut applied_new = false;
        for item in &batch.items {
            if state.applied.insert(item.id.clone()) {
                applied_new = true;
                if state.apply_uploads {
                    let key = item.entity.storage_key();
                    match item.operation {
                        Operation::Delete => {
                            state.snapshot.remove(&key);
                        }
                        Operation::Create | Operation::Update => {
                            state.snapshot.upsert(
                                key,
                                SnapshotEntry {
                                    payload: item.payload.clone(),
                                    updated_at: item.enqueued_at,
                                },
                            );
                        }
                    }
                }
            }
        }
        if applied_new {
            state.version += 1;
        }

        Ok(UploadAck {
            accepted_ids: batch.items.iter().map(|i| i.id.clone()).collect(),
            version: state.version,
            updated_at: Utc::now(),
        })
    }

    async fn download(&self) -> Result<RemoteSnapshot, GatewayError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_next_downloads > 0 {
            state.fail_next_downloads -= 1;
            return Err(GatewayError::Server("injected failure".to_string()));
        }

        Ok(RemoteSnapshot {
            snapshot: state.snapshot.clone(),
            version: state.version,
            updated_at: Utc::now(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn favorites_key() -> EntityKey {
    EntityKey::new(EntityKind::Favorites, "default")
}

fn layout_key() -> EntityKey {
    EntityKey::new(EntityKind::Layout, "default")
}

/// Engine over a fresh store, with the persisted config tweaked before
/// construction so load-time settings (queue cap, debounce) take effect
fn build_engine(
    gateway: Arc<FakeGateway>,
    initial: NetworkState,
    seed: impl FnOnce(&mut SyncConfig),
) -> (SyncEngine, Arc<ManualNetworkMonitor>) {
    let store = Arc::new(MemoryStore::new());
    let mut config = SyncConfig::default();
    seed(&mut config);
    store.put_json("sync.config", &config).unwrap();

    let monitor = Arc::new(ManualNetworkMonitor::new(initial));
    let engine = SyncEngine::new(gateway, monitor.clone(), store).unwrap();
    (engine, monitor)
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Offline / Reconnect Flows
// ============================================================================

#[tokio::test]
async fn test_offline_favorite_syncs_on_reconnect() {
    let gateway = FakeGateway::new();
    let (engine, monitor) = build_engine(gateway.clone(), NetworkState::Offline, |_| {});

    engine.enable(SyncStrategy::Automatic).await.unwrap();

    // Favorite stream X while offline
    engine
        .track_change(favorites_key(), Operation::Update, json!([{"id": "X"}]))
        .await
        .unwrap();

    let status = engine.get_status();
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.network, NetworkState::Offline);
    assert!(status.last_sync_at.is_none());

    // Reconnect; the engine must sync immediately, not wait for a tick
    monitor.set_state(NetworkState::Online);

    let drained = wait_until(
        || {
            let s = engine.get_status();
            s.pending_count == 0 && s.last_sync_at.is_some()
        },
        3000,
    )
    .await;
    assert!(drained, "pending mutation was not drained after reconnect");

    let remote = gateway.remote_snapshot();
    assert_eq!(
        remote.entry("favorites:default").unwrap().payload,
        json!([{"id": "X"}])
    );
    assert!(engine.get_status().conflicts.is_empty());
}

#[tokio::test]
async fn test_sync_now_reports_whether_a_cycle_ran() {
    let gateway = FakeGateway::new();
    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});

    // Disabled engine rejects
    assert!(!engine.sync_now().await);

    engine.enable(SyncStrategy::Automatic).await.unwrap();
    assert!(engine.sync_now().await);
}

// ============================================================================
// Conflicts
// ============================================================================

/// Seed the server with another device's layout so a local edit of the same
/// entity conflicts on the next download
fn seed_remote_layout(gateway: &FakeGateway, payload: Value) {
    let mut snapshot = Snapshot::new();
    snapshot.upsert(
        "layout:default".to_string(),
        SnapshotEntry {
            payload,
            updated_at: Utc::now(),
        },
    );
    gateway.set_remote(snapshot, 1);
    // The server keeps its copy; uploads ack without overwriting it
    gateway.set_apply_uploads(false);
}

#[tokio::test]
async fn test_two_devices_same_layout_use_remote_wins() {
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3, "owner": "device-a"}));

    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |config| {
        config.conflict_strategy = ConflictStrategy::UseRemote;
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(
            layout_key(),
            Operation::Create,
            json!({"panes": 2, "owner": "device-b"}),
        )
        .await
        .unwrap();

    assert!(engine.sync_now().await);

    // The remote device's layout wins
    let local = engine.local_snapshot().unwrap();
    assert_eq!(
        local.entry("layout:default").unwrap().payload,
        json!({"panes": 3, "owner": "device-a"})
    );

    let status = engine.get_status();
    assert!(status.conflicts.is_empty());
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
}

#[tokio::test]
async fn test_merge_unions_favorites_by_identity() {
    let gateway = FakeGateway::new();
    let mut remote = Snapshot::new();
    remote.upsert(
        "favorites:default".to_string(),
        SnapshotEntry {
            payload: json!([{"id": "B"}, {"id": "C"}]),
            updated_at: Utc::now(),
        },
    );
    gateway.set_remote(remote, 1);
    gateway.set_apply_uploads(false);

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |config| {
        config.conflict_strategy = ConflictStrategy::Merge;
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(
            favorites_key(),
            Operation::Update,
            json!([{"id": "A"}, {"id": "B"}]),
        )
        .await
        .unwrap();

    assert!(engine.sync_now().await);

    let local = engine.local_snapshot().unwrap();
    assert_eq!(
        local.entry("favorites:default").unwrap().payload,
        json!([{"id": "A"}, {"id": "B"}, {"id": "C"}])
    );
}

#[tokio::test]
async fn test_prompt_without_resolver_fails_closed() {
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3}));

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::PromptOnConflict).await.unwrap();

    engine
        .track_change(layout_key(), Operation::Update, json!({"panes": 8}))
        .await
        .unwrap();

    assert!(engine.sync_now().await);

    // Conflict surfaced, nothing decided, progress markers untouched
    let status = engine.get_status();
    assert_eq!(status.conflicts.len(), 1);
    assert!(status.last_sync_at.is_none());
    assert_eq!(status.pending_count, 1);

    // Local value untouched as well
    let local = engine.local_snapshot().unwrap();
    assert_eq!(local.entry("layout:default").unwrap().payload, json!({"panes": 8}));
}

#[tokio::test]
async fn test_prompt_resolver_unblocks_cycle() {
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3}));

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::PromptOnConflict).await.unwrap();
    engine.set_conflict_resolver(|_conflict| Some(Resolution::UseLocal));

    engine
        .track_change(layout_key(), Operation::Update, json!({"panes": 8}))
        .await
        .unwrap();

    assert!(engine.sync_now().await);

    let status = engine.get_status();
    assert!(status.conflicts.is_empty());
    assert!(status.last_sync_at.is_some());

    let local = engine.local_snapshot().unwrap();
    assert_eq!(local.entry("layout:default").unwrap().payload, json!({"panes": 8}));
}

#[tokio::test]
async fn test_manual_strategy_with_explicit_resolution() {
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3, "owner": "device-a"}));

    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Manual).await.unwrap();

    let local_payload = json!({"panes": 2, "owner": "device-b"});
    engine
        .track_change(layout_key(), Operation::Create, local_payload.clone())
        .await
        .unwrap();

    assert!(engine.sync_now().await);
    assert_eq!(engine.get_status().conflicts.len(), 1);

    // Caller picks the local side; once the server accepts uploads again the
    // next cycle converges
    engine
        .resolve_conflict(&layout_key(), Resolution::UseLocal)
        .await
        .unwrap();
    assert!(engine.get_status().conflicts.is_empty());

    gateway.set_apply_uploads(true);
    assert!(engine.sync_now().await);

    let status = engine.get_status();
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
    assert_eq!(
        engine.local_snapshot().unwrap().entry("layout:default").unwrap().payload,
        local_payload
    );
}

#[tokio::test]
async fn test_status_listener_sees_conflict_before_idle() {
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3}));

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Manual).await.unwrap();

    let seen: Arc<StdMutex<Vec<SyncState>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen_clone = seen.clone();
    engine.subscribe_status(move |status| {
        seen_clone.lock().unwrap().push(status.state);
    });

    engine
        .track_change(layout_key(), Operation::Update, json!({"panes": 8}))
        .await
        .unwrap();
    assert!(engine.sync_now().await);

    let states = seen.lock().unwrap().clone();
    let syncing = states.iter().position(|s| *s == SyncState::Syncing);
    assert!(syncing.is_some(), "never observed Syncing: {:?}", states);
    let conflict = states[syncing.unwrap()..]
        .iter()
        .position(|s| *s == SyncState::Conflict)
        .map(|i| i + syncing.unwrap());
    assert!(conflict.is_some(), "never observed Conflict: {:?}", states);
    let idle_after = states[conflict.unwrap()..]
        .iter()
        .any(|s| *s == SyncState::Idle);
    assert!(idle_after, "never returned to Idle: {:?}", states);
}

// ============================================================================
// Failure Handling & Retries
// ============================================================================

#[tokio::test]
async fn test_transient_failure_retries_with_backoff() {
    let gateway = FakeGateway::new();
    gateway.fail_uploads(1, FailKind::Transient);

    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |_| {});
    let engine = engine.with_retry_policy(RetryPolicy {
        base_delay_ms: 40,
        max_delay_ms: 500,
        jitter_factor: 0.0,
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(favorites_key(), Operation::Update, json!([{"id": "X"}]))
        .await
        .unwrap();

    assert!(engine.sync_now().await);
    assert_eq!(engine.get_status().state, SyncState::Idle);
    assert_eq!(engine.get_status().pending_count, 1);

    // The scheduled backoff timer drains the queue without further calls
    let drained = wait_until(|| engine.get_status().pending_count == 0, 3000).await;
    assert!(drained, "backoff retry never drained the queue");
    assert!(gateway.upload_calls() >= 2);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_drops_and_reports() {
    let gateway = FakeGateway::new();
    gateway.fail_uploads(10, FailKind::Transient);

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |config| {
        config.max_retries = 1;
    });
    // Long retry delays so only the manual sync below drives the cycle
    let engine = engine.with_retry_policy(RetryPolicy {
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        jitter_factor: 0.0,
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(favorites_key(), Operation::Update, json!([{"id": "X"}]))
        .await
        .unwrap();

    // Single failed attempt exhausts the one-retry budget
    assert!(engine.sync_now().await);

    let status = engine.get_status();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.dropped_count, 1);
}

#[tokio::test]
async fn test_auth_failure_disables_sync() {
    let gateway = FakeGateway::new();
    gateway.fail_uploads(1, FailKind::Unauthorized);

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(favorites_key(), Operation::Update, json!([{"id": "X"}]))
        .await
        .unwrap();

    assert!(engine.sync_now().await);

    // Surfaced immediately; no retries until the host re-authenticates
    let status = engine.get_status();
    assert!(!status.is_enabled);
    assert_eq!(status.pending_count, 1);
    assert!(!engine.sync_now().await);
}

#[tokio::test]
async fn test_replaying_acked_upload_is_idempotent() {
    let gateway = FakeGateway::new();
    // Upload succeeds but the same cycle's download fails, so the engine
    // requeues and uploads the identical batch again
    gateway.fail_downloads(1);

    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |_| {});
    let engine = engine.with_retry_policy(RetryPolicy {
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        jitter_factor: 0.0,
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(favorites_key(), Operation::Update, json!([{"id": "X"}]))
        .await
        .unwrap();

    assert!(engine.sync_now().await); // upload ok, download fails
    assert_eq!(engine.get_status().pending_count, 1);

    assert!(engine.sync_now().await); // replayed upload, then clean download
    assert_eq!(engine.get_status().pending_count, 0);

    // The server saw the batch twice but applied it once
    assert_eq!(gateway.upload_calls(), 2);
    let remote = gateway.remote_snapshot();
    assert_eq!(
        remote.entry("favorites:default").unwrap().payload,
        json!([{"id": "X"}])
    );
}

// ============================================================================
// Debounce & Concurrency
// ============================================================================

#[tokio::test]
async fn test_burst_of_changes_collapses_into_one_sync() {
    let gateway = FakeGateway::new();
    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |config| {
        config.debounce_window_ms = 80;
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    for i in 0..3 {
        engine
            .track_change(
                EntityKey::new(EntityKind::Layout, format!("layout-{}", i)),
                Operation::Create,
                json!({"panes": i}),
            )
            .await
            .unwrap();
    }

    let drained = wait_until(|| engine.get_status().pending_count == 0, 3000).await;
    assert!(drained, "debounced sync never ran");
    assert_eq!(gateway.upload_calls(), 1, "burst must collapse into one upload");
}

#[tokio::test]
async fn test_concurrent_sync_rejected() {
    let gateway = FakeGateway::with_delay(Duration::from_millis(250));
    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    let background = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_now().await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(
        !engine.sync_now().await,
        "second sync must be rejected while one is in flight"
    );

    assert!(background.await.unwrap());
}

// ============================================================================
// Queue Cap & Force Operations
// ============================================================================

#[tokio::test]
async fn test_queue_cap_eviction_reaches_status() {
    let gateway = FakeGateway::new();
    let (engine, _monitor) = build_engine(gateway, NetworkState::Offline, |config| {
        config.queue_cap = 2;
    });
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    for i in 0..3 {
        engine
            .track_change(
                EntityKey::new(EntityKind::Layout, format!("layout-{}", i)),
                Operation::Create,
                json!({"panes": i}),
            )
            .await
            .unwrap();
    }

    let status = engine.get_status();
    assert_eq!(status.pending_count, 2);
    assert_eq!(status.evicted_count, 1);
}

#[tokio::test]
async fn test_force_pull_overwrites_local_state() {
    let gateway = FakeGateway::new();
    let mut remote = Snapshot::new();
    remote.upsert(
        "preferences:default".to_string(),
        SnapshotEntry {
            payload: json!({"theme": "light"}),
            updated_at: Utc::now(),
        },
    );
    gateway.set_remote(remote, 5);

    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(
            EntityKey::new(EntityKind::Preferences, "default"),
            Operation::Update,
            json!({"theme": "dark"}),
        )
        .await
        .unwrap();

    engine.force_pull_remote().await.unwrap();

    let status = engine.get_status();
    assert_eq!(status.pending_count, 0);

    let local = engine.local_snapshot().unwrap();
    assert_eq!(
        local.entry("preferences:default").unwrap().payload,
        json!({"theme": "light"})
    );
}

#[tokio::test]
async fn test_force_push_overrides_remote() {
    let gateway = FakeGateway::new();
    let mut remote = Snapshot::new();
    remote.upsert(
        "preferences:default".to_string(),
        SnapshotEntry {
            payload: json!({"theme": "light"}),
            updated_at: Utc::now(),
        },
    );
    gateway.set_remote(remote, 5);

    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(
            EntityKey::new(EntityKind::Preferences, "default"),
            Operation::Update,
            json!({"theme": "dark"}),
        )
        .await
        .unwrap();

    engine.force_push_local().await.unwrap();

    let remote = gateway.remote_snapshot();
    assert_eq!(
        remote.entry("preferences:default").unwrap().payload,
        json!({"theme": "dark"})
    );
    assert_eq!(engine.get_status().pending_count, 0);
}

// ============================================================================
// History & Rollback
// ============================================================================

#[tokio::test]
async fn test_history_records_each_completed_sync() {
    let gateway = FakeGateway::new();
    let (engine, _monitor) = build_engine(gateway, NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(layout_key(), Operation::Create, json!({"panes": 2}))
        .await
        .unwrap();
    assert!(engine.sync_now().await);

    engine
        .track_change(layout_key(), Operation::Update, json!({"panes": 4}))
        .await
        .unwrap();
    assert!(engine.sync_now().await);

    let history = engine.sync_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);
}

#[tokio::test]
async fn test_rollback_restores_and_pushes_previous_version() {
    let gateway = FakeGateway::new();
    let (engine, _monitor) = build_engine(gateway.clone(), NetworkState::Online, |_| {});
    engine.enable(SyncStrategy::Automatic).await.unwrap();

    engine
        .track_change(layout_key(), Operation::Create, json!({"panes": 2}))
        .await
        .unwrap();
    assert!(engine.sync_now().await);

    engine
        .track_change(layout_key(), Operation::Update, json!({"panes": 4}))
        .await
        .unwrap();
    assert!(engine.sync_now().await);

    engine.rollback_to_version(1).await.unwrap();

    let local = engine.local_snapshot().unwrap();
    assert_eq!(local.entry("layout:default").unwrap().payload, json!({"panes": 2}));

    let remote = gateway.remote_snapshot();
    assert_eq!(
        remote.entry("layout:default").unwrap().payload,
        json!({"panes": 2})
    );
}

// ============================================================================
// Restart Recovery
// ============================================================================

#[tokio::test]
async fn test_restart_restores_queue_and_conflicts() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let gateway = FakeGateway::new();
    seed_remote_layout(&gateway, json!({"panes": 3}));
    let monitor = Arc::new(ManualNetworkMonitor::new(NetworkState::Online));

    {
        let engine = SyncEngine::new(gateway.clone(), monitor.clone(), store.clone()).unwrap();
        engine.enable(SyncStrategy::Manual).await.unwrap();
        engine
            .track_change(layout_key(), Operation::Update, json!({"panes": 8}))
            .await
            .unwrap();
        assert!(engine.sync_now().await);
        assert_eq!(engine.get_status().conflicts.len(), 1);
        engine.disable().await.unwrap();
    }

    // A new process over the same store resumes where the old one stopped
    let engine = SyncEngine::new(gateway, monitor, store).unwrap();
    let status = engine.get_status();
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.conflicts.len(), 1);
    assert!(!status.is_syncing);
    assert_eq!(status.state, SyncState::Idle);
}
