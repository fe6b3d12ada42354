//! Circuit breaker gating reconnection attempts.
//!
//! When connection failures cluster, hammering the endpoint makes recovery
//! slower for everyone. The breaker cuts retries off after
//! `failure_threshold` failures inside `failure_window`, holds the circuit
//! open for `min_open_time`, then lets probe attempts through (half-open)
//! until `success_threshold` successes close it again.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts allowed; failures are counted.
    Closed,
    /// Attempts rejected until `min_open_time` elapses.
    Open,
    /// Probe attempts allowed; one failure reopens.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open required to close.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub min_open_time: Duration,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            min_open_time: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Counters {
    failures: u32,
    successes: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Three-state failure-rate gate. State reads are lock-free; transitions
/// and counter updates serialize on an internal mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    counters: Mutex<Counters>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(STATE_CLOSED),
            counters: Mutex::new(Counters {
                failures: 0,
                successes: 0,
                window_start: None,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Whether a connection attempt may proceed right now. In the open
    /// state this transitions to half-open once `min_open_time` has
    /// elapsed, admitting the caller as the probe.
    pub fn can_attempt(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let mut counters = self.counters.lock();
                // Re-check under the lock; another thread may have probed.
                if self.state.load(Ordering::Acquire) != STATE_OPEN {
                    return true;
                }
                let elapsed = counters.opened_at.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.min_open_time) {
                    counters.successes = 0;
                    self.state.store(STATE_HALF_OPEN, Ordering::Release);
                    debug!("circuit_half_open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self) {
        let mut counters = self.counters.lock();
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                let now = Instant::now();
                let window_expired = counters
                    .window_start
                    .map_or(true, |start| {
                        now.duration_since(start) > self.config.failure_window
                    });
                if window_expired {
                    counters.window_start = Some(now);
                    counters.failures = 1;
                } else {
                    counters.failures += 1;
                }

                if counters.failures >= self.config.failure_threshold {
                    counters.opened_at = Some(now);
                    self.state.store(STATE_OPEN, Ordering::Release);
                    warn!(
                        failures = counters.failures,
                        open_secs = self.config.min_open_time.as_secs(),
                        "circuit_opened"
                    );
                }
            }
            STATE_HALF_OPEN => {
                // Probe failed: straight back to open.
                counters.opened_at = Some(Instant::now());
                counters.successes = 0;
                self.state.store(STATE_OPEN, Ordering::Release);
                warn!("circuit_reopened");
            }
            _ => {}
        }
    }

    pub fn record_success(&self) {
        let mut counters = self.counters.lock();
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                counters.failures = 0;
                counters.window_start = None;
            }
            STATE_HALF_OPEN => {
                counters.successes += 1;
                if counters.successes >= self.config.success_threshold {
                    counters.failures = 0;
                    counters.successes = 0;
                    counters.window_start = None;
                    counters.opened_at = None;
                    self.state.store(STATE_CLOSED, Ordering::Release);
                    debug!("circuit_closed");
                }
            }
            _ => {}
        }
    }

    /// Force closed and zero both counters.
    pub fn reset(&self) {
        let mut counters = self.counters.lock();
        counters.failures = 0;
        counters.successes = 0;
        counters.window_start = None;
        counters.opened_at = None;
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    pub fn failure_count(&self) -> u32 {
        self.counters.lock().failures
    }

    pub fn success_count(&self) -> u32 {
        self.counters.lock().successes
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
