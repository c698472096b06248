//! Network Monitor - Connectivity Interface
//!
//! The engine never probes the network itself; the host platform reports
//! reachability through a [`NetworkMonitor`] implementation. Transitions are
//! delivered at most once per actual state change, which the orchestrator
//! relies on when deciding to kick off an immediate sync after coming back
//! online.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Reachability as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkState::Online => "online",
            NetworkState::Offline => "offline",
        }
    }
}

/// Connectivity source implemented by the host platform.
///
/// `watch()` receivers observe the current state plus every subsequent
/// transition; duplicate reports of an unchanged state must not wake
/// subscribers.
pub trait NetworkMonitor: Send + Sync {
    fn current(&self) -> NetworkState;
    fn watch(&self) -> watch::Receiver<NetworkState>;
}

/// Host-driven monitor: the platform layer pushes transitions into it.
///
/// Also serves as the test double for the engine.
pub struct ManualNetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl ManualNetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Report a reachability change. Reporting the current state again is a
    /// no-op and wakes nobody.
    pub fn set_state(&self, state: NetworkState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            log::info!("Network transition: {}", state.as_str());
        }
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
