//! Retry Policy - Exponential Backoff
//!
//! Pure delay computation for failed upload batches. The orchestrator owns
//! the actual timers; this module only answers "how long until the next
//! attempt".

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Ceiling for any computed delay
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed delay (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay for the given retry count: `base * 2^retry_count`,
    /// capped at the ceiling. Monotonically non-decreasing in `retry_count`.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        // Saturate the shift so large retry counts cannot overflow
        let multiplier = 1u64.checked_shl(retry_count.min(32)).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }

    /// `next_delay` plus up to `jitter_factor` random extra, so simultaneous
    /// retries from many clients spread out.
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let base = self.next_delay(retry_count);
        if self.jitter_factor <= 0.0 {
            return base;
        }

        let jitter = rand::thread_rng().gen_range(0.0..self.jitter_factor);
        base + Duration::from_millis((base.as_millis() as f64 * jitter) as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
