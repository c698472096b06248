//! # GridCast Sync
//!
//! Offline-first data synchronization engine for GridCast, the multi-stream
//! viewer. Reconciles a user's local state (favorites, layouts, preferences,
//! watch history) with a remote store across intermittent connectivity,
//! multiple devices, and concurrent local/remote mutation.
//!
//! The engine is built from injected collaborators so the host application
//! decides the transport, the storage location, and the connectivity source:
//!
//! ```no_run
//! use gridcast_sync::db::SqliteStore;
//! use gridcast_sync::sync::{
//!     HttpGateway, ManualNetworkMonitor, NetworkState, SyncEngine, SyncStrategy,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(HttpGateway::default_endpoint()?);
//! let monitor = Arc::new(ManualNetworkMonitor::new(NetworkState::Online));
//! let store = Arc::new(SqliteStore::open_default()?);
//!
//! let engine = SyncEngine::new(gateway, monitor, store)?;
//! engine.enable(SyncStrategy::Automatic).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Local mutations go through [`sync::SyncEngine::track_change`] and are
//! queued durably; the engine uploads them and reconciles the downloaded
//! remote snapshot whenever it is online, on a debounced trigger, a periodic
//! timer, or an explicit `sync_now`.

pub mod db;
pub mod sync;

pub use db::{MemoryStore, SqliteStore, StateStore, StateStoreExt, StoreError};
pub use sync::{SyncEngine, SyncError, SyncStatus, SyncStrategy};
