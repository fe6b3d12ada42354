//! Sequence-gap detection for private streams.
//!
//! Orders, own trades and balance updates carry monotonic sequence numbers.
//! The tracker keeps the last seen sequence per `(channel, key)` and
//! reports skips that exceed the configured tolerance. Watermarks are wiped
//! on every successful (re)connection since the exchange restarts the
//! numbering per session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::{Channel, GapEvent};

#[derive(Debug, Clone)]
pub struct GapConfig {
    pub enabled: bool,
    /// Skips of up to this many sequence numbers are tolerated silently.
    pub tolerance: u64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance: 0,
        }
    }
}

/// Watermark tracker over sequence-numbered streams.
#[derive(Debug, Default)]
pub struct GapTracker {
    config: GapConfig,
    watermarks: Mutex<HashMap<(Channel, String), u64>>,
    gap_count: AtomicU64,
}

impl GapTracker {
    pub fn new(config: GapConfig) -> Self {
        Self {
            config,
            watermarks: Mutex::new(HashMap::new()),
            gap_count: AtomicU64::new(0),
        }
    }

    /// Record an observed sequence. Returns a [`GapEvent`] when the skip
    /// from the previous watermark exceeds the tolerance. Duplicates and
    /// out-of-order arrivals are ignored; skips within tolerance advance
    /// the watermark silently.
    pub fn observe(&self, channel: Channel, key: &str, seq: u64) -> Option<GapEvent> {
        if !self.config.enabled {
            return None;
        }

        let mut watermarks = self.watermarks.lock();
        let map_key = (channel, key.to_string());
        let last = match watermarks.get(&map_key) {
            None => {
                watermarks.insert(map_key, seq);
                return None;
            }
            Some(&last) => last,
        };

        if seq <= last {
            return None; // duplicate or out-of-order
        }

        watermarks.insert(map_key, seq);

        if seq > last + 1 + self.config.tolerance {
            self.gap_count.fetch_add(1, Ordering::Relaxed);
            return Some(GapEvent {
                channel,
                symbol: key.to_string(),
                last_seq: last,
                current_seq: seq,
                gap_size: seq - last - 1,
            });
        }
        None
    }

    /// Forget all watermarks. Called on every successful (re)connection.
    pub fn reset_all(&self) {
        self.watermarks.lock().clear();
    }

    /// Total gaps detected over the tracker's lifetime. Survives
    /// `reset_all`.
    pub fn gap_count(&self) -> u64 {
        self.gap_count.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
