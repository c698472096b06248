//! Sync History Module - Snapshot Management & Rollback
//!
//! Records a compact snapshot of the synced baseline after each successful
//! sync, enabling rollback to a previous version. Snapshots are gzip
//! compressed, base64 encoded for storage, and integrity-checked with a
//! SHA-256 hash on the way back out. A retention cap keeps the history
//! bounded.

use super::gateway::{gzip_compress, gzip_decompress};
use super::models::Snapshot;
use crate::db::{StateStore, StateStoreExt, StoreError};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const HISTORY_KEY: &str = "sync.history";
const DEFAULT_RETENTION: usize = 20;

// ============================================================================
// Types & Structures
// ============================================================================

/// Sync operation type for history tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Push,
    Pull,
    Merge,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Push => "push",
            SyncOperation::Pull => "pull",
            SyncOperation::Merge => "merge",
        }
    }
}

/// One recorded snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: i64,
    pub operation: SyncOperation,
    pub entry_count: usize,
    pub device_id: String,
    /// Base64 of the gzip-compressed snapshot JSON
    pub snapshot: String,
    /// SHA-256 hex of the compressed bytes
    pub hash: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// History
// ============================================================================

/// Bounded, integrity-checked snapshot history
pub struct SyncHistory {
    store: Arc<dyn StateStore>,
    retention: usize,
}

impl SyncHistory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(store: Arc<dyn StateStore>, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Record a snapshot, trimming the oldest entries past the retention cap
    pub fn record(
        &self,
        snapshot: &Snapshot,
        version: i64,
        device_id: &str,
        operation: SyncOperation,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), HistoryError> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;
        let compressed = gzip_compress(&json).map_err(HistoryError::Encoding)?;
        let hash = hex::encode(Sha256::digest(&compressed));
        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);

        let mut entries = self.load_entries()?;
        // Re-recording a version replaces the earlier snapshot
        entries.retain(|e| e.version != version);
        entries.push(HistoryEntry {
            version,
            operation,
            entry_count: snapshot.len(),
            device_id: device_id.to_string(),
            snapshot: encoded,
            hash,
            recorded_at,
        });

        entries.sort_by_key(|e| e.version);
        while entries.len() > self.retention {
            let trimmed = entries.remove(0);
            log::debug!("History retention trimmed version {}", trimmed.version);
        }

        self.store.put_json(HISTORY_KEY, &entries)?;
        log::info!(
            "Recorded {} snapshot for version {} ({} entries)",
            operation.as_str(),
            version,
            snapshot.len()
        );
        Ok(())
    }

    /// Recorded entries, newest first
    pub fn entries(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = self.load_entries()?;
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Decode the snapshot recorded for a version, verifying integrity
    pub fn snapshot_at(&self, version: i64) -> Result<Option<Snapshot>, HistoryError> {
        let entries = self.load_entries()?;
        let Some(entry) = entries.into_iter().find(|e| e.version == version) else {
            return Ok(None);
        };

        let compressed = base64::engine::general_purpose::STANDARD
            .decode(&entry.snapshot)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;

        let computed_hash = hex::encode(Sha256::digest(&compressed));
        if computed_hash != entry.hash {
            return Err(HistoryError::IntegrityCheckFailed);
        }

        let json = gzip_decompress(&compressed).map_err(HistoryError::Encoding)?;
        let snapshot: Snapshot = serde_json::from_slice(&json)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;
        Ok(Some(snapshot))
    }

    fn load_entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.store.get_json(HISTORY_KEY)?.unwrap_or_default())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot encoding error: {0}")]
    Encoding(String),

    #[error("Integrity check failed - snapshot may be corrupted")]
    IntegrityCheckFailed,
}

// ============================================================================
// Tests
// ============================================================================
