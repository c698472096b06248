//! Conflict Detection & Resolution
//!
//! Detection is a three-way diff: local and remote are each compared against
//! the last-synced baseline, and a conflict exists only when both sides
//! changed independently since that baseline and disagree. A field the
//! client never touched that changed remotely is a clean remote-wins update,
//! not a conflict.
//!
//! Resolution is strategy-driven. Automatic resolution applies the entity
//! kind's merge schema (ordered-collection-by-identity, keyed-map, scalar);
//! manual resolution leaves conflicts pending; prompt resolution delegates to
//! a caller-registered callback and fails closed when none is registered.

use super::models::{
    ConflictRecord, ConflictStrategy, EntityKey, MergeKind, Resolution, Snapshot, SnapshotEntry,
    SyncStrategy,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Caller-supplied resolver for `PromptOnConflict`; returning `None` leaves
/// the conflict pending.
pub type ConflictPrompt = dyn Fn(&ConflictRecord) -> Option<Resolution> + Send + Sync;

// ============================================================================
// Detection
// ============================================================================

/// Outcome of a three-way diff
#[derive(Debug, Default)]
pub struct Detection {
    /// Entities independently mutated on both sides
    pub conflicts: Vec<ConflictRecord>,
    /// Clean remote-side changes to apply locally; `None` entry means the
    /// remote deleted the entity
    pub remote_updates: Vec<(String, Option<SnapshotEntry>)>,
    /// Keys changed locally only (already queued for upload; informational)
    pub local_changes: Vec<String>,
}

/// Compare local and remote snapshots against the last-synced baseline
pub fn detect(local: &Snapshot, remote: &Snapshot, baseline: &Snapshot) -> Detection {
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(local.entries.keys());
    keys.extend(remote.entries.keys());
    keys.extend(baseline.entries.keys());

    let mut detection = Detection::default();

    for key in keys {
        let local_entry = local.entry(key);
        let remote_entry = remote.entry(key);
        let base_entry = baseline.entry(key);

        let local_changed = payload_of(local_entry) != payload_of(base_entry);
        let remote_changed = payload_of(remote_entry) != payload_of(base_entry);

        match (local_changed, remote_changed) {
            (false, false) => {}
            (true, false) => detection.local_changes.push(key.clone()),
            (false, true) => {
                detection
                    .remote_updates
                    .push((key.clone(), remote_entry.cloned()));
            }
            (true, true) => {
                // Both sides moved; agreement is convergence, not a conflict
                if payload_of(local_entry) == payload_of(remote_entry) {
                    detection
                        .remote_updates
                        .push((key.clone(), remote_entry.cloned()));
                    continue;
                }

                let Some(entity) = EntityKey::parse(key) else {
                    log::warn!("Skipping snapshot key with unknown entity kind: {}", key);
                    continue;
                };

                detection.conflicts.push(ConflictRecord {
                    entity,
                    local_value: value_of(local_entry),
                    remote_value: value_of(remote_entry),
                    local_timestamp: timestamp_of(local_entry),
                    remote_timestamp: timestamp_of(remote_entry),
                    resolution: None,
                    merged_value: None,
                });
            }
        }
    }

    detection
}

fn payload_of(entry: Option<&SnapshotEntry>) -> Option<&Value> {
    entry.map(|e| &e.payload)
}

fn value_of(entry: Option<&SnapshotEntry>) -> Value {
    entry.map(|e| e.payload.clone()).unwrap_or(Value::Null)
}

fn timestamp_of(entry: Option<&SnapshotEntry>) -> Option<DateTime<Utc>> {
    entry.map(|e| e.updated_at)
}

// ============================================================================
// Resolution
// ============================================================================

/// Annotate each conflict with an outcome according to the strategy.
///
/// `auto` is the policy applied under `SyncStrategy::Automatic`. Records left
/// with `resolution == None` stay pending; the orchestrator then ends the
/// cycle in the conflict state instead of completing.
pub fn resolve(
    conflicts: Vec<ConflictRecord>,
    strategy: SyncStrategy,
    auto: ConflictStrategy,
    prompt: Option<&ConflictPrompt>,
) -> Vec<ConflictRecord> {
    match strategy {
        SyncStrategy::Automatic => conflicts
            .into_iter()
            .map(|record| match auto {
                ConflictStrategy::UseLocal => ConflictRecord {
                    resolution: Some(Resolution::UseLocal),
                    ..record
                },
                ConflictStrategy::UseRemote => ConflictRecord {
                    resolution: Some(Resolution::UseRemote),
                    ..record
                },
                ConflictStrategy::Merge => resolve_automatic(record),
            })
            .collect(),
        SyncStrategy::Manual => conflicts,
        SyncStrategy::PromptOnConflict => {
            let Some(prompt) = prompt else {
                // Fail closed: never silently pick a side
                log::warn!(
                    "PromptOnConflict with no resolver registered; leaving {} conflict(s) pending",
                    conflicts.len()
                );
                return conflicts;
            };

            conflicts
                .into_iter()
                .map(|record| {
                    match prompt(&record) {
                        Some(Resolution::Merged) => resolve_automatic(record),
                        Some(resolution) => ConflictRecord {
                            resolution: Some(resolution),
                            ..record
                        },
                        None => record,
                    }
                })
                .collect()
        }
    }
}

/// Annotate a single pending conflict with an explicit caller choice
/// (`Merged` delegates to the entity kind's merge schema).
pub(crate) fn apply_choice(record: ConflictRecord, choice: Resolution) -> ConflictRecord {
    match choice {
        Resolution::Merged => resolve_automatic(record),
        other => ConflictRecord {
            resolution: Some(other),
            ..record
        },
    }
}

/// Apply the entity kind's merge schema to one conflict
fn resolve_automatic(record: ConflictRecord) -> ConflictRecord {
    let (resolution, merged_value) = merge_values(
        record.entity.kind.merge_kind(),
        &record.local_value,
        &record.remote_value,
    );

    ConflictRecord {
        resolution: Some(resolution),
        merged_value,
        ..record
    }
}

/// Type-directed merge. Payloads that do not match their declared schema
/// (including deletions, where one side is null) fall back to remote-wins.
fn merge_values(kind: MergeKind, local: &Value, remote: &Value) -> (Resolution, Option<Value>) {
    match kind {
        MergeKind::OrderedSet { identity } => match (local.as_array(), remote.as_array()) {
            (Some(local_items), Some(remote_items)) => {
                let merged = union_by_identity(local_items, remote_items, identity);
                (Resolution::Merged, Some(Value::Array(merged)))
            }
            _ => (Resolution::UseRemote, None),
        },
        MergeKind::KeyedMap => match (local.as_object(), remote.as_object()) {
            (Some(local_map), Some(remote_map)) => {
                let merged = shallow_merge(local_map, remote_map);
                (Resolution::Merged, Some(Value::Object(merged)))
            }
            _ => (Resolution::UseRemote, None),
        },
        MergeKind::Scalar => (Resolution::UseRemote, None),
    }
}

/// Union two ordered collections, local order first, remote-only items
/// appended. Duplicates are removed by the identity field, not by full
/// equality; items without the field dedupe on their whole value.
fn union_by_identity(local: &[Value], remote: &[Value], identity: &str) -> Vec<Value> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut merged = Vec::with_capacity(local.len() + remote.len());

    for item in local.iter().chain(remote.iter()) {
        let key = identity_key(item, identity);
        if seen.insert(key) {
            merged.push(item.clone());
        }
    }

    merged
}

fn identity_key(item: &Value, identity: &str) -> String {
    match item.get(identity) {
        Some(id) => id.to_string(),
        None => item.to_string(),
    }
}

/// Shallow-merge two JSON objects with remote precedence on key collision
fn shallow_merge(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = local.clone();
    for (key, value) in remote {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

// ============================================================================
// Tests
// ============================================================================
