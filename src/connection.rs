//! WebSocket transport.
//!
//! The connection owns a small private tokio runtime and exposes a
//! blocking facade to the threaded client: `send` serializes writers
//! through a mutex, `receive` blocks with a bounded poll so the stop flag
//! is observed within a few hundred milliseconds even on a silent wire.
//! Server pings are answered inline and never surface to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::config::RateLimitConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interval at which a blocked `receive` rechecks the stop flag.
const RECEIVE_POLL: Duration = Duration::from_millis(250);

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Token bucket gating outbound control frames. `acquire` blocks the
/// calling thread until a token is available; data frames never pass
/// through here.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            rate: config.requests_per_second,
            burst: config.burst as f64,
            state: Mutex::new(BucketState {
                tokens: config.burst as f64,
                refilled_at: Instant::now(),
            }),
        }
    }

    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.refilled_at = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            trace!(wait_ms = wait.as_millis() as u64, "rate_limit_wait");
            std::thread::sleep(wait);
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One TLS WebSocket session. Scoped to a single reader-thread lifecycle;
/// on fault the client drops it and constructs a fresh one.
pub(crate) struct Connection {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    open: AtomicBool,
    limiter: Option<RateLimiter>,
    // Declared last so the IO halves drop before their runtime.
    rt: tokio::runtime::Runtime,
}

impl Connection {
    /// Establish the session or fail within `connect_timeout`.
    pub fn connect(
        url: &str,
        connect_timeout: Duration,
        rate_limit: Option<RateLimitConfig>,
    ) -> Result<Self> {
        // One worker is enough: callers block on the runtime from their
        // own threads while the worker drives IO.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kraken-ws-io")
            .enable_all()
            .build()
            .context("failed to build connection runtime")?;

        debug!(url, "connecting");
        let connect = rt.block_on(async {
            tokio::time::timeout(connect_timeout, connect_async(url)).await
        });
        let (stream, response) = match connect {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(anyhow!(e).context("websocket handshake failed")),
            Err(_) => bail!("connect timed out after {connect_timeout:?}"),
        };
        debug!(status = response.status().as_u16(), "connected");

        let (writer, reader) = stream.split();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            open: AtomicBool::new(true),
            limiter: rate_limit.map(RateLimiter::new),
            rt,
        })
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Send one text frame. Serialized by the writer mutex; optionally
    /// throttled by the token bucket.
    pub fn send(&self, frame: &str) -> Result<()> {
        if !self.is_open() {
            bail!("connection is not open");
        }
        if let Some(limiter) = &self.limiter {
            limiter.acquire();
        }

        let mut writer = self.writer.lock();
        let sent = self
            .rt
            .block_on(writer.send(Message::Text(frame.to_string())));
        if let Err(e) = sent {
            self.open.store(false, Ordering::Release);
            return Err(anyhow!(e).context("send failed"));
        }
        Ok(())
    }

    /// Receive the next text frame. Returns `Ok(None)` on a requested stop
    /// or local close; transport faults return an error. Blocks, polling
    /// the stop flag at a bounded interval.
    pub fn receive(&self, stop: &AtomicBool) -> Result<Option<String>> {
        let mut reader = self.reader.lock();
        loop {
            if stop.load(Ordering::Relaxed) || !self.is_open() {
                return Ok(None);
            }

            let next = self
                .rt
                .block_on(async { tokio::time::timeout(RECEIVE_POLL, reader.next()).await });
            let message = match next {
                Err(_) => continue, // poll tick, nothing received
                Ok(None) => {
                    self.open.store(false, Ordering::Release);
                    bail!("stream ended");
                }
                Ok(Some(Err(e))) => {
                    self.open.store(false, Ordering::Release);
                    return Err(anyhow!(e).context("receive failed"));
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => return Ok(Some(text)),
                Message::Ping(payload) => {
                    let mut writer = self.writer.lock();
                    if let Err(e) = self.rt.block_on(writer.send(Message::Pong(payload))) {
                        warn!(error = %e, "pong_send_failed");
                    }
                }
                Message::Close(frame) => {
                    debug!(?frame, "server_close");
                    self.open.store(false, Ordering::Release);
                    bail!("server closed connection");
                }
                Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Close the session. Safe to call from any thread and idempotent; a
    /// blocked `receive` observes the closure within one poll interval.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock();
        let closed = self.rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), writer.send(Message::Close(None))).await
        });
        if closed.is_err() {
            debug!("close_frame_timed_out");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}
