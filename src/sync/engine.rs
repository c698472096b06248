//! Sync Engine - Orchestrator
//!
//! Coordinates the whole pipeline: queue draining, remote exchange, conflict
//! handling, and status publication. Constructed from injected collaborators
//! (remote gateway, network monitor, state store, clock) so every external
//! effect can be substituted in tests.
//!
//! State machine: Idle -> Syncing -> {Completed | Failed | Conflict} -> Idle.
//! A single sync is in flight at a time; the in-flight flag is the only
//! mutex guarding a full cycle. Triggers:
//! - debounced local mutations (`track_change`)
//! - a periodic timer
//! - Offline -> Online transitions while mutations are pending
//! - host foreground notifications and manual `sync_now` calls
//!
//! Every timer and watcher task is owned by the engine and cancelled by the
//! single teardown path in `disable`, so no callback can outlive the engine
//! and write to a torn-down store.

use super::conflict::{self, ConflictPrompt};
use super::events::{EventBus, EventSubscriptionId, SyncEvent, SyncEventKind};
use super::gateway::{GatewayError, RemoteGateway, UploadBatch};
use super::history::{HistoryEntry, HistoryError, SyncHistory, SyncOperation};
use super::models::{
    Clock, EntityKey, Operation, Resolution, Snapshot, SnapshotEntry, SyncConfig, SyncQueueItem,
    SyncState, SyncStatus, SyncStrategy, SystemClock,
};
use super::network::NetworkMonitor;
use super::queue::{DurableQueue, QueueError, RequeueOutcome};
use super::retry::RetryPolicy;
use super::status::{StatusStore, SubscriptionId};
use crate::db::{StateStore, StateStoreExt, StoreError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;

const LOCAL_KEY: &str = "sync.local";
const BASELINE_KEY: &str = "sync.baseline";
const CONFIG_KEY: &str = "sync.config";

// ============================================================================
// Engine
// ============================================================================

/// Offline-first sync orchestrator.
///
/// Cheap to clone; clones share all state. Background tasks hold clones and
/// are aborted on `disable`.
#[derive(Clone)]
pub struct SyncEngine {
    gateway: Arc<dyn RemoteGateway>,
    monitor: Arc<dyn NetworkMonitor>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: Arc<RwLock<SyncConfig>>,
    retry: RetryPolicy,
    queue: Arc<AsyncMutex<DurableQueue>>,
    status: Arc<StatusStore>,
    events: Arc<EventBus>,
    history: Arc<SyncHistory>,
    syncing: Arc<AtomicBool>,
    prompt: Arc<StdMutex<Option<Box<ConflictPrompt>>>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    debounce_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<()>>>>,
}

/// Terminal state of one sync cycle
enum CycleOutcome {
    Completed,
    Conflict,
    Failed,
}

/// Releases the in-flight flag on every exit path
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Create an engine with the system clock
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<dyn NetworkMonitor>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, SyncError> {
        Self::with_clock(gateway, monitor, store, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock (deterministic tests)
    pub fn with_clock(
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<dyn NetworkMonitor>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        // Device identity must survive restarts, so the config is persisted
        // the first time it is generated
        let config: SyncConfig = match store.get_json(CONFIG_KEY)? {
            Some(config) => config,
            None => {
                let config = SyncConfig::default();
                store.put_json(CONFIG_KEY, &config)?;
                config
            }
        };

        let queue = DurableQueue::load(store.clone(), config.queue_cap)?;
        let status = StatusStore::load(store.clone())?;
        let history = SyncHistory::new(store.clone());

        let pending = queue.len();
        let evicted = queue.evicted_total();
        let network = monitor.current();
        status.update(|s| {
            s.pending_count = pending;
            s.evicted_count = evicted;
            s.network = network;
        })?;

        log::info!(
            "Sync engine initialized (device {}, {} pending)",
            config.device_id,
            pending
        );

        Ok(Self {
            gateway,
            monitor,
            store,
            clock,
            config: Arc::new(RwLock::new(config)),
            retry: RetryPolicy::default(),
            queue: Arc::new(AsyncMutex::new(queue)),
            status: Arc::new(status),
            events: Arc::new(EventBus::new()),
            history: Arc::new(history),
            syncing: Arc::new(AtomicBool::new(false)),
            prompt: Arc::new(StdMutex::new(None)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
            debounce_tx: Arc::new(StdMutex::new(None)),
        })
    }

    /// Replace the retry policy (call before `enable`)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ========================================================================
    // Control Surface
    // ========================================================================

    /// Turn sync on with the given conflict strategy and start the
    /// background triggers
    pub async fn enable(&self, strategy: SyncStrategy) -> Result<(), SyncError> {
        // Re-enabling restarts the trigger tasks from scratch
        self.cancel_tasks();

        self.status.update(|s| {
            s.is_enabled = true;
            s.strategy = strategy;
        })?;

        self.spawn_debounce().await;
        self.spawn_periodic().await;
        self.spawn_network_watcher();

        self.emit(
            SyncEventKind::SettingsChanged,
            json!({ "enabled": true, "strategy": strategy }),
        );
        log::info!("Sync enabled ({:?})", strategy);
        Ok(())
    }

    /// Turn sync off: cancel every timer and watcher, then clear listeners.
    /// No further state mutation happens after this returns.
    pub async fn disable(&self) -> Result<(), SyncError> {
        self.cancel_tasks();
        {
            let mut tx = self.debounce_tx.lock().unwrap_or_else(|e| e.into_inner());
            *tx = None;
        }

        self.status.update(|s| {
            s.is_enabled = false;
            s.is_syncing = false;
            s.state = SyncState::Idle;
        })?;
        self.emit(SyncEventKind::SettingsChanged, json!({ "enabled": false }));

        self.status.clear_listeners();
        self.events.clear_listeners();
        log::info!("Sync disabled");
        Ok(())
    }

    /// Record a local mutation: apply it to the local snapshot, enqueue it
    /// for upload, and arm the debounced auto-sync. Returns the queue item id.
    pub async fn track_change(
        &self,
        entity: EntityKey,
        operation: Operation,
        payload: Value,
    ) -> Result<String, SyncError> {
        if !self.status.get().is_enabled {
            return Err(SyncError::Disabled);
        }

        let now = self.clock.now();

        // Local state reflects the mutation immediately, online or not
        let mut local = self.load_local()?;
        let key = entity.storage_key();
        match operation {
            Operation::Delete => {
                local.remove(&key);
            }
            Operation::Create | Operation::Update => {
                local.upsert(
                    key,
                    SnapshotEntry {
                        payload: payload.clone(),
                        updated_at: now,
                    },
                );
            }
        }
        self.save_local(&local)?;

        let max_retries = self.config.read().await.max_retries;
        let item = SyncQueueItem::new(operation, entity, payload, now, max_retries);

        let (id, evicted, pending, evicted_total) = {
            let mut queue = self.queue.lock().await;
            let receipt = queue.enqueue(item)?;
            (receipt.id, receipt.evicted, queue.len(), queue.evicted_total())
        };

        self.status.update(|s| {
            s.pending_count = pending;
            s.evicted_count = evicted_total;
        })?;

        if evicted > 0 {
            log::warn!("Queue cap evicted {} item(s) while tracking a change", evicted);
        }

        // Burst writes collapse into one sync after the quiet window
        let tx = self.debounce_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(());
        }

        Ok(id)
    }

    /// Run one sync cycle now. Returns `false` when the attempt is rejected:
    /// sync disabled, network offline, or another cycle already in flight.
    pub async fn sync_now(&self) -> bool {
        if !self.status.get().is_enabled {
            log::debug!("sync_now rejected: sync disabled");
            return false;
        }
        if !self.monitor.current().is_online() {
            log::debug!("sync_now rejected: offline");
            return false;
        }

        let guard = match self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => FlightGuard(&self.syncing),
            Err(_) => {
                log::debug!("sync_now rejected: already in progress");
                return false;
            }
        };

        let outcome = self.run_cycle().await;

        let _ = self.status.update(|s| {
            s.is_syncing = false;
            s.state = SyncState::Idle;
        });
        drop(guard);

        match outcome {
            CycleOutcome::Completed => log::info!("Sync cycle completed"),
            CycleOutcome::Conflict => log::warn!("Sync cycle ended with pending conflicts"),
            CycleOutcome::Failed => log::warn!("Sync cycle failed"),
        }
        true
    }

    /// Host signal that the app returned to the foreground
    pub async fn notify_foreground(&self) {
        log::debug!("Foreground transition, attempting sync");
        self.sync_now().await;
    }

    /// Upload the entire local snapshot, overriding the remote copy
    pub async fn force_push_local(&self) -> Result<(), SyncError> {
        let guard = self.begin_exclusive()?;
        let result = self.force_push_inner().await;
        let _ = self.status.update(|s| {
            s.is_syncing = false;
            s.state = SyncState::Idle;
        });
        drop(guard);
        result
    }

    /// Replace local state with the remote snapshot, dropping queued
    /// mutations
    pub async fn force_pull_remote(&self) -> Result<(), SyncError> {
        let guard = self.begin_exclusive()?;
        let result = self.force_pull_inner().await;
        let _ = self.status.update(|s| {
            s.is_syncing = false;
            s.state = SyncState::Idle;
        });
        drop(guard);
        result
    }

    /// Register the resolver used by `SyncStrategy::PromptOnConflict`
    pub fn set_conflict_resolver<F>(&self, resolver: F)
    where
        F: Fn(&super::models::ConflictRecord) -> Option<Resolution> + Send + Sync + 'static,
    {
        let mut prompt = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
        *prompt = Some(Box::new(resolver));
    }

    /// Resolve one pending conflict (the `Manual` strategy's follow-up).
    /// Applies the chosen value locally and removes the record; remaining
    /// queued items reconcile on the next cycle.
    pub async fn resolve_conflict(
        &self,
        entity: &EntityKey,
        choice: Resolution,
    ) -> Result<(), SyncError> {
        let pending = self.status.get().conflicts;
        let record = pending
            .iter()
            .find(|c| &c.entity == entity)
            .cloned()
            .ok_or_else(|| SyncError::UnknownConflict(entity.to_string()))?;

        let resolved = conflict::apply_choice(record, choice);

        let mut local = self.load_local()?;
        let key = entity.storage_key();
        match resolved.resolved_value() {
            Some(Some(value)) => local.upsert(
                key,
                SnapshotEntry {
                    payload: value.clone(),
                    updated_at: self.clock.now(),
                },
            ),
            Some(None) => {
                local.remove(&key);
            }
            None => return Err(SyncError::UnknownConflict(entity.to_string())),
        }
        self.save_local(&local)?;

        self.status.update(|s| {
            s.conflicts.retain(|c| &c.entity != entity);
        })?;

        // Reconcile with the remote once the burst of resolutions settles
        let tx = self.debounce_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(());
        }

        Ok(())
    }

    /// Read-only snapshot of the current status
    pub fn get_status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Current local state
    pub fn local_snapshot(&self) -> Result<Snapshot, SyncError> {
        self.load_local()
    }

    /// Engine configuration (device identity included)
    pub async fn get_config(&self) -> SyncConfig {
        self.config.read().await.clone()
    }

    /// Update configuration; takes effect on the next `enable`
    pub async fn update_config(&self, new_config: SyncConfig) -> Result<(), SyncError> {
        self.store.put_json(CONFIG_KEY, &new_config)?;
        *self.config.write().await = new_config;
        self.emit(SyncEventKind::SettingsChanged, json!({ "config": true }));
        Ok(())
    }

    pub fn subscribe_status<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    pub fn unsubscribe_status(&self, id: SubscriptionId) {
        self.status.unsubscribe(id);
    }

    pub fn subscribe_events<F>(&self, listener: F) -> EventSubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe_events(&self, id: EventSubscriptionId) {
        self.events.unsubscribe(id);
    }

    /// Recorded sync snapshots, newest first
    pub fn sync_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, SyncError> {
        Ok(self.history.entries(limit)?)
    }

    /// Restore the local snapshot recorded for `version` and push it
    pub async fn rollback_to_version(&self, version: i64) -> Result<(), SyncError> {
        let snapshot = self
            .history
            .snapshot_at(version)?
            .ok_or(SyncError::UnknownVersion(version))?;

        log::info!("Rolling back local state to version {}", version);
        self.save_local(&snapshot)?;
        self.force_push_local().await
    }

    // ========================================================================
    // Sync Cycle
    // ========================================================================

    async fn run_cycle(&self) -> CycleOutcome {
        let _ = self.status.update(|s| {
            s.is_syncing = true;
            s.state = SyncState::Syncing;
        });
        self.emit(SyncEventKind::SyncStarted, json!({}));

        let config = self.config.read().await.clone();
        let batch = {
            let queue = self.queue.lock().await;
            queue.drain(config.batch_size)
        };

        match self.exchange(&config, &batch).await {
            Ok(outcome) => outcome,
            Err(err) => self.handle_failure(err, batch).await,
        }
    }

    /// Upload pending mutations, download the authoritative snapshot,
    /// reconcile
    async fn exchange(
        &self,
        config: &SyncConfig,
        batch: &[SyncQueueItem],
    ) -> Result<CycleOutcome, SyncError> {
        let deadline = Duration::from_secs(config.request_timeout_secs);

        if !batch.is_empty() {
            let upload = UploadBatch {
                items: batch.to_vec(),
                device_id: config.device_id.clone(),
                timestamp: self.clock.now(),
            };
            let ack = tokio::time::timeout(deadline, self.gateway.upload(&upload))
                .await
                .map_err(|_| SyncError::Gateway(GatewayError::Timeout))??;
            log::debug!(
                "Uploaded {} item(s), server version {}",
                batch.len(),
                ack.version
            );
        }

        let remote = tokio::time::timeout(deadline, self.gateway.download())
            .await
            .map_err(|_| SyncError::Gateway(GatewayError::Timeout))??;

        let mut local = self.load_local()?;
        let baseline = self.load_baseline()?;
        let detection = conflict::detect(&local, &remote.snapshot, &baseline);

        // Clean remote-side changes apply regardless of conflicts elsewhere
        for (key, entry) in &detection.remote_updates {
            match entry {
                Some(entry) => local.upsert(key.clone(), entry.clone()),
                None => {
                    local.remove(key);
                }
            }
        }

        if detection.conflicts.is_empty() {
            self.save_local(&local)?;
            return self
                .complete_cycle(config, batch, &local, remote.version, Vec::new())
                .await;
        }

        let conflict_count = detection.conflicts.len();
        self.emit(
            SyncEventKind::ConflictDetected,
            json!({ "count": conflict_count }),
        );

        let strategy = self.status.get().strategy;
        let records = {
            let prompt = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
            conflict::resolve(
                detection.conflicts,
                strategy,
                config.conflict_strategy,
                prompt.as_deref(),
            )
        };

        if records.iter().any(|r| !r.is_resolved()) {
            // Fail closed: items stay queued, baseline and last_sync_at stay
            // put, the pending set is surfaced for the caller
            self.save_local(&local)?;
            self.status.update(|s| {
                s.state = SyncState::Conflict;
                s.conflicts = records;
            })?;
            return Ok(CycleOutcome::Conflict);
        }

        let now = self.clock.now();
        for record in &records {
            let key = record.entity.storage_key();
            match record.resolved_value() {
                Some(Some(value)) => local.upsert(
                    key,
                    SnapshotEntry {
                        payload: value.clone(),
                        updated_at: now,
                    },
                ),
                Some(None) => {
                    local.remove(&key);
                }
                None => {}
            }
        }
        self.save_local(&local)?;

        self.complete_cycle(config, batch, &local, remote.version, records)
            .await
    }

    /// Advance the baseline, ack the uploaded items, publish completion
    async fn complete_cycle(
        &self,
        config: &SyncConfig,
        batch: &[SyncQueueItem],
        local: &Snapshot,
        remote_version: i64,
        resolved: Vec<super::models::ConflictRecord>,
    ) -> Result<CycleOutcome, SyncError> {
        self.save_baseline(local)?;

        let acked: Vec<String> = batch.iter().map(|item| item.id.clone()).collect();
        let pending = {
            let mut queue = self.queue.lock().await;
            queue.remove(&acked)?;
            queue.len()
        };

        let now = self.clock.now();
        let operation = if !resolved.is_empty() {
            SyncOperation::Merge
        } else if batch.is_empty() {
            SyncOperation::Pull
        } else {
            SyncOperation::Push
        };
        if let Err(e) =
            self.history
                .record(local, remote_version, &config.device_id, operation, now)
        {
            // History is best-effort bookkeeping; the sync itself succeeded
            log::warn!("Failed to record history snapshot: {}", e);
        }

        self.status.update(|s| {
            s.state = SyncState::Completed;
            s.last_sync_at = Some(now);
            s.pending_count = pending;
            s.conflicts.clear();
        })?;
        self.emit(
            SyncEventKind::SyncCompleted,
            json!({
                "version": remote_version,
                "pending": pending,
                "resolved_conflicts": resolved.len(),
            }),
        );

        Ok(CycleOutcome::Completed)
    }

    /// Classify a failed exchange: requeue transient failures with backoff,
    /// drop what can never succeed, disable on auth rejection
    async fn handle_failure(&self, err: SyncError, batch: Vec<SyncQueueItem>) -> CycleOutcome {
        log::error!("Sync exchange failed: {}", err);

        let mut dropped: u64 = 0;
        let mut next_attempt: u32 = 0;
        let mut requeued = 0usize;
        let mut disable_sync = false;

        match &err {
            SyncError::Gateway(gateway_err) if gateway_err.is_retryable() => {
                let mut queue = self.queue.lock().await;
                for item in batch {
                    match queue.requeue(item) {
                        Ok(RequeueOutcome::Requeued) => requeued += 1,
                        Ok(RequeueOutcome::Exhausted(item)) => {
                            log::warn!(
                                "Dropping {} after {} attempts",
                                item.entity,
                                item.retry_count
                            );
                            dropped += 1;
                        }
                        Err(e) => log::error!("Failed to requeue item: {}", e),
                    }
                }
                next_attempt = queue
                    .drain(usize::MAX)
                    .iter()
                    .map(|item| item.retry_count)
                    .max()
                    .unwrap_or(0);
            }
            SyncError::Gateway(GatewayError::Unauthorized)
            | SyncError::Gateway(GatewayError::Rejected(_)) => {
                // Not retryable: the host must re-authenticate before sync
                // can resume
                disable_sync = true;
            }
            SyncError::Gateway(GatewayError::Serialization(_)) | SyncError::Serialization(_) => {
                // Corrupt payloads never become valid; drop them
                let ids: Vec<String> = batch.iter().map(|item| item.id.clone()).collect();
                dropped += ids.len() as u64;
                let mut queue = self.queue.lock().await;
                if let Err(e) = queue.remove(&ids) {
                    log::error!("Failed to drop corrupt items: {}", e);
                }
            }
            _ => {}
        }

        let (pending, evicted_total) = {
            let queue = self.queue.lock().await;
            (queue.len(), queue.evicted_total())
        };

        let _ = self.status.update(|s| {
            s.state = SyncState::Failed;
            s.pending_count = pending;
            s.evicted_count = evicted_total;
            s.dropped_count += dropped;
            if disable_sync {
                s.is_enabled = false;
            }
        });
        self.emit(
            SyncEventKind::SyncFailed,
            json!({
                "error": err.to_string(),
                "dropped": dropped,
                "pending": pending,
            }),
        );

        if disable_sync {
            self.cancel_tasks();
            log::warn!("Sync disabled pending re-authentication");
        } else if requeued > 0 {
            let delay = self.retry.jittered_delay(next_attempt);
            self.schedule_retry(delay);
        }

        CycleOutcome::Failed
    }

    /// Independent backoff timer for one failed batch
    fn schedule_retry(&self, delay: Duration) {
        log::info!("Scheduling retry in {:?}", delay);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.sync_now().await;
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    // ========================================================================
    // Force Operations
    // ========================================================================

    async fn force_push_inner(&self) -> Result<(), SyncError> {
        let config = self.config.read().await.clone();
        let local = self.load_local()?;
        let now = self.clock.now();

        let _ = self.status.update(|s| {
            s.is_syncing = true;
            s.state = SyncState::Syncing;
        });
        self.emit(SyncEventKind::SyncStarted, json!({ "forced": "push" }));

        let items: Vec<SyncQueueItem> = local
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                EntityKey::parse(key).map(|entity| {
                    SyncQueueItem::new(
                        Operation::Update,
                        entity,
                        entry.payload.clone(),
                        now,
                        config.max_retries,
                    )
                })
            })
            .collect();

        let upload = UploadBatch {
            items,
            device_id: config.device_id.clone(),
            timestamp: now,
        };
        let deadline = Duration::from_secs(config.request_timeout_secs);
        let ack = tokio::time::timeout(deadline, self.gateway.upload(&upload))
            .await
            .map_err(|_| SyncError::Gateway(GatewayError::Timeout))??;

        self.save_baseline(&local)?;
        {
            let mut queue = self.queue.lock().await;
            queue.clear()?;
        }

        if let Err(e) = self.history.record(
            &local,
            ack.version,
            &config.device_id,
            SyncOperation::Push,
            now,
        ) {
            log::warn!("Failed to record history snapshot: {}", e);
        }

        self.status.update(|s| {
            s.state = SyncState::Completed;
            s.last_sync_at = Some(now);
            s.pending_count = 0;
            s.conflicts.clear();
        })?;
        self.emit(
            SyncEventKind::SyncCompleted,
            json!({ "forced": "push", "version": ack.version }),
        );
        Ok(())
    }

    async fn force_pull_inner(&self) -> Result<(), SyncError> {
        let config = self.config.read().await.clone();

        let _ = self.status.update(|s| {
            s.is_syncing = true;
            s.state = SyncState::Syncing;
        });
        self.emit(SyncEventKind::SyncStarted, json!({ "forced": "pull" }));

        let deadline = Duration::from_secs(config.request_timeout_secs);
        let remote = tokio::time::timeout(deadline, self.gateway.download())
            .await
            .map_err(|_| SyncError::Gateway(GatewayError::Timeout))??;

        self.save_local(&remote.snapshot)?;
        self.save_baseline(&remote.snapshot)?;
        {
            let mut queue = self.queue.lock().await;
            queue.clear()?;
        }

        let now = self.clock.now();
        if let Err(e) = self.history.record(
            &remote.snapshot,
            remote.version,
            &config.device_id,
            SyncOperation::Pull,
            now,
        ) {
            log::warn!("Failed to record history snapshot: {}", e);
        }

        self.status.update(|s| {
            s.state = SyncState::Completed;
            s.last_sync_at = Some(now);
            s.pending_count = 0;
            s.conflicts.clear();
        })?;
        self.emit(
            SyncEventKind::SyncCompleted,
            json!({ "forced": "pull", "version": remote.version }),
        );
        Ok(())
    }

    fn begin_exclusive(&self) -> Result<FlightGuard<'_>, SyncError> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| FlightGuard(&self.syncing))
            .map_err(|_| SyncError::AlreadyInProgress)
    }

    // ========================================================================
    // Background Triggers
    // ========================================================================

    async fn spawn_periodic(&self) {
        let interval_secs = self.config.read().await.sync_interval_secs.max(1);
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the periodic timer should
            // not force a sync at enable time
            ticker.tick().await;

            loop {
                ticker.tick().await;
                log::debug!("Periodic sync tick");
                engine.sync_now().await;
            }
        });

        self.push_task(handle);
    }

    async fn spawn_debounce(&self) {
        let window = Duration::from_millis(self.config.read().await.debounce_window_ms.max(1));
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        {
            let mut slot = self.debounce_tx.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(tx);
        }

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Keep extending the quiet window while mutations arrive
                loop {
                    match tokio::time::timeout(window, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                log::debug!("Debounce window elapsed, syncing");
                engine.sync_now().await;
            }
        });

        self.push_task(handle);
    }

    fn spawn_network_watcher(&self) {
        let engine = self.clone();
        let mut rx = self.monitor.watch();

        let handle = tokio::spawn(async move {
            loop {
                let state = *rx.borrow_and_update();
                if engine.status.get().network != state {
                    let _ = engine.status.update(|s| s.network = state);
                }

                if state.is_online() && engine.status.get().pending_count > 0 {
                    log::info!("Online with pending mutations, syncing immediately");
                    engine.sync_now().await;
                }

                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        self.push_task(handle);
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(handle);
    }

    /// Single teardown path for every engine-owned task
    fn cancel_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    // ========================================================================
    // Persistence Helpers
    // ========================================================================

    fn load_local(&self) -> Result<Snapshot, SyncError> {
        Ok(self.store.get_json(LOCAL_KEY)?.unwrap_or_default())
    }

    fn save_local(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        Ok(self.store.put_json(LOCAL_KEY, snapshot)?)
    }

    fn load_baseline(&self) -> Result<Snapshot, SyncError> {
        Ok(self.store.get_json(BASELINE_KEY)?.unwrap_or_default())
    }

    fn save_baseline(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        Ok(self.store.put_json(BASELINE_KEY, snapshot)?)
    }

    fn emit(&self, kind: SyncEventKind, payload: Value) {
        self.events.emit(SyncEvent {
            kind,
            timestamp: self.clock.now(),
            payload,
        });
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync is disabled")]
    Disabled,

    #[error("Sync already in progress")]
    AlreadyInProgress,

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No pending conflict for {0}")]
    UnknownConflict(String),

    #[error("No history snapshot for version {0}")]
    UnknownVersion(i64),
}

// ============================================================================
// Tests
// ============================================================================
