//! Alert strategies and their dispatch engine.
//!
//! Strategies are values implementing [`AlertStrategy`]; users may register
//! custom implementations alongside the built-in [`PriceAlert`],
//! [`VolumeSpike`] and [`SpreadAlert`]. Every user invocation (strategy
//! check and alert callback alike) runs inside a panic barrier: a panic is
//! translated to a `CallbackError` event and the pipeline keeps going.

mod price_alert;
mod spread_alert;
mod volume_spike;

pub use price_alert::{PriceAlert, PriceAlertBuilder};
pub use spread_alert::{SpreadAlert, SpreadAlertBuilder};
pub use volume_spike::{VolumeSpike, VolumeSpikeBuilder};

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ErrorEvent, ErrorKind};
use crate::types::{Alert, Ticker};

/// A user-supplied alert predicate evaluated over the ticker stream.
pub trait AlertStrategy: Send {
    /// Evaluate one ticker. Returning true fires the alert.
    fn check(&mut self, ticker: &Ticker) -> bool;

    /// Stable strategy name, used in alerts and telemetry.
    fn name(&self) -> &str;

    /// Symbols this strategy wants to see. Tickers for other symbols are
    /// not dispatched to it.
    fn symbols(&self) -> Vec<String>;

    /// Clear latched state so the strategy can fire again.
    fn reset(&mut self);

    fn has_fired(&self) -> bool {
        self.fire_count() > 0
    }

    fn fire_count(&self) -> u64 {
        0
    }

    /// Human-readable description of the most recent firing.
    fn last_message(&self) -> String {
        String::new()
    }
}

pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

struct StrategyEntry {
    name: String,
    strategy: Mutex<Box<dyn AlertStrategy>>,
    callback: AlertCallback,
    enabled: AtomicBool,
}

/// Registry of alert strategies with enable/disable and dispatch.
pub(crate) struct StrategyEngine {
    entries: Mutex<BTreeMap<u64, Arc<StrategyEntry>>>,
    next_id: AtomicU64,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, strategy: Box<dyn AlertStrategy>, callback: AlertCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(StrategyEntry {
            name: strategy.name().to_string(),
            strategy: Mutex::new(strategy),
            callback,
            enabled: AtomicBool::new(true),
        });
        self.entries.lock().insert(id, entry);
        debug!(alert_id = id, "alert_added");
        id
    }

    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    pub fn enable(&self, id: u64) {
        if let Some(entry) = self.entries.lock().get(&id) {
            entry.enabled.store(true, Ordering::Relaxed);
        }
    }

    pub fn disable(&self, id: u64) {
        if let Some(entry) = self.entries.lock().get(&id) {
            entry.enabled.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_enabled(&self, id: u64) -> bool {
        self.entries
            .lock()
            .get(&id)
            .map(|entry| entry.enabled.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn list(&self) -> Vec<(u64, String)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.name.clone()))
            .collect()
    }

    /// Run every enabled, symbol-matching strategy against one ticker.
    /// Returns the names of the strategies that fired.
    pub fn dispatch(&self, ticker: &Ticker, on_error: &dyn Fn(ErrorEvent)) -> Vec<String> {
        // Snapshot the entries so user code never runs under the registry
        // lock and strategies may be added or removed from callbacks.
        let entries: Vec<Arc<StrategyEntry>> =
            self.entries.lock().values().cloned().collect();

        let mut fired = Vec::new();
        for entry in entries {
            if !entry.enabled.load(Ordering::Relaxed) {
                continue;
            }

            let alert = {
                let mut strategy = entry.strategy.lock();
                if !strategy.symbols().iter().any(|s| s == &ticker.symbol) {
                    continue;
                }
                let checked = catch_unwind(AssertUnwindSafe(|| strategy.check(ticker)));
                match checked {
                    Ok(false) => continue,
                    Ok(true) => Alert {
                        strategy_name: entry.name.clone(),
                        symbol: ticker.symbol.clone(),
                        message: strategy.last_message(),
                        price: ticker.last,
                        triggered_at: Utc::now(),
                    },
                    Err(_) => {
                        on_error(ErrorEvent::with_details(
                            ErrorKind::CallbackError,
                            format!("strategy {} panicked in check", entry.name),
                            ticker.symbol.clone(),
                        ));
                        continue;
                    }
                }
            };

            if catch_unwind(AssertUnwindSafe(|| (entry.callback)(&alert))).is_err() {
                on_error(ErrorEvent::with_details(
                    ErrorKind::CallbackError,
                    format!("alert callback for {} panicked", entry.name),
                    alert.symbol.clone(),
                ));
            }
            fired.push(entry.name.clone());
        }
        fired
    }
}
