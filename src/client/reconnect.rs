//! Reader thread and the reconnect state machine.
//!
//! The reader owns the connection for its lifetime: it connects, loops on
//! `receive`, and on any transport fault runs the reconnect loop in place.
//! Reconnection is paced by the backoff strategy and gated by the circuit
//! breaker; a successful reconnect resets the gap tracker and resends
//! every active, unpaused subscription.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::core::ClientCore;
use crate::connection::Connection;
use crate::error::{ErrorEvent, ErrorKind};
use crate::types::{ConnectionState, ReconnectEvent};

/// Slice length for interruptible sleeps; the stop flag is checked
/// between slices.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Reader thread body: initial connect, receive loop, fault handling.
pub(crate) fn reader_loop(core: Arc<ClientCore>) {
    core.set_state(ConnectionState::Connecting);

    match core.open_connection() {
        Ok(()) => core.on_connected(),
        Err(e) => {
            core.breaker.record_failure();
            core.emit_error(ErrorEvent::with_details(
                ErrorKind::ConnectionFailed,
                "initial connection failed",
                e.to_string(),
            ));
            if !core.handle_reconnect("Initial connection failed") {
                return;
            }
        }
    }

    loop {
        if core.stop_requested.load(Ordering::Relaxed) {
            break;
        }
        let Some(connection) = core.connection.read().clone() else {
            break;
        };

        match connection.receive(&core.stop_requested) {
            Ok(Some(frame)) => core.ingest_frame(&frame),
            // Requested stop or local close: leave without reconnecting.
            Ok(None) => break,
            Err(e) => {
                if core.stop_requested.load(Ordering::Relaxed) {
                    break;
                }
                warn!(error = %e, "transport_fault");
                core.emit_error(ErrorEvent::with_details(
                    ErrorKind::ConnectionClosed,
                    "connection lost",
                    e.to_string(),
                ));
                if !core.handle_reconnect("Connection lost") {
                    break;
                }
            }
        }
    }
    info!("reader_exited");
}

impl ClientCore {
    pub(crate) fn open_connection(&self) -> anyhow::Result<()> {
        let connection = Connection::connect(&self.url, self.connect_timeout, self.rate_limit)?;
        *self.connection.write() = Some(Arc::new(connection));
        Ok(())
    }

    /// Post-connect bookkeeping shared by the initial connect and every
    /// reconnect: breaker success, fresh backoff, fresh sequence
    /// watermarks, resubscription.
    pub(crate) fn on_connected(&self) {
        self.breaker.record_success();
        self.backoff.lock().reset();
        self.gaps.reset_all();
        self.set_state(ConnectionState::Connected);
        self.resubscribe_all();
    }

    /// Reconnect until success, stop, or attempt exhaustion. Returns true
    /// on success.
    pub(crate) fn handle_reconnect(&self, reason: &str) -> bool {
        if self.stop_requested.load(Ordering::Relaxed) {
            return false;
        }

        self.set_state(ConnectionState::Reconnecting);
        let old = self.connection.write().take();
        if let Some(old) = old {
            old.close();
        }
        self.backoff.lock().reset();

        while !self.stop_requested.load(Ordering::Relaxed) {
            if !self.breaker.can_attempt() {
                self.emit_error(ErrorEvent::new(
                    ErrorKind::ConnectionFailed,
                    "circuit breaker is open - connection failures exceeded threshold",
                ));
                self.sleep_interruptibly(self.breaker.config().min_open_time);
                continue;
            }

            let (attempt, max_attempts, delay) = {
                let mut backoff = self.backoff.lock();
                if backoff.should_stop() {
                    break;
                }
                let attempt = backoff.current_attempt();
                (attempt, backoff.max_attempts(), backoff.next_delay())
            };

            if let Some(cb) = &self.on_reconnect {
                let event = ReconnectEvent {
                    attempt,
                    max_attempts,
                    delay,
                    reason: reason.to_string(),
                };
                let cb = cb.clone();
                self.guarded("reconnect", reason, || cb(&event));
            }
            self.counters.record_reconnect_attempt();
            info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect_backoff"
            );
            self.sleep_interruptibly(delay);

            if self.stop_requested.load(Ordering::Relaxed) {
                break;
            }

            match self.open_connection() {
                Ok(()) => {
                    self.on_connected();
                    info!(attempt, "reconnected");
                    return true;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    self.emit_error(ErrorEvent::with_details(
                        ErrorKind::ConnectionFailed,
                        format!("reconnect attempt {attempt} failed"),
                        e.to_string(),
                    ));
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.emit_error(ErrorEvent::new(
            ErrorKind::ConnectionFailed,
            "failed to reconnect after maximum attempts",
        ));
        false
    }

    /// Sleep in slices, returning early when stop is requested.
    fn sleep_interruptibly(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.stop_requested.load(Ordering::Relaxed) {
                return;
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}
