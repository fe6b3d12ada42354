//! Telemetry counters and the user-facing metrics snapshot.
//!
//! Counters are relaxed atomics updated from the hot path; no locks. The
//! per-strategy alert tally is the one exception and lives behind a mutex
//! because it is touched only when an alert actually fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::types::ConnectionState;

/// Atomic counters updated by the pipeline.
#[derive(Debug)]
pub(crate) struct TelemetryCounters {
    pub messages_received: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub parse_errors: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub alerts_triggered: AtomicU64,
    latency_max_us: AtomicU64,
    alerts_by_strategy: Mutex<HashMap<String, u64>>,
    started_at: Instant,
}

impl TelemetryCounters {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            alerts_triggered: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            alerts_by_strategy: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, strategy_name: &str) {
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);
        let mut by_strategy = self.alerts_by_strategy.lock();
        *by_strategy.entry(strategy_name.to_string()).or_insert(0) += 1;
    }

    /// Track the maximum queue-to-dispatch latency seen so far.
    #[inline]
    pub fn record_latency(&self, latency: Duration) {
        let us = latency.as_micros() as u64;
        self.latency_max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn alerts_for(&self, strategy_name: &str) -> u64 {
        self.alerts_by_strategy
            .lock()
            .get(strategy_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self, queue_depth: usize, state: ConnectionState) -> Metrics {
        Metrics {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            queue_depth,
            connection_state: state,
            latency_max: Duration::from_micros(self.latency_max_us.load(Ordering::Relaxed)),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Point-in-time view of the client's counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_dropped: u64,
    pub parse_errors: u64,
    pub checksum_failures: u64,
    pub reconnect_attempts: u64,
    pub gaps_detected: u64,
    pub alerts_triggered: u64,
    pub queue_depth: usize,
    pub connection_state: ConnectionState,
    pub latency_max: Duration,
    pub uptime: Duration,
}

impl Metrics {
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.messages_processed as f64 / secs
    }

    pub fn uptime(&self) -> Duration {
        self.uptime
    }

    /// Uptime as `HH:MM:SS`.
    pub fn uptime_string(&self) -> String {
        let total = self.uptime.as_secs();
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}
