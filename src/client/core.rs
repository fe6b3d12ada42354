//! Shared client state: callback table, subscription registry, snapshot
//! maps, engines, counters, and the frame-sending surface.
//!
//! Everything here is owned by one `Arc<ClientCore>` shared between the
//! user-facing handle, the reader thread and the dispatcher thread. User
//! callbacks are cloned out of the table before invocation, so replacing a
//! callback never blocks on a running invocation and a replaced callback
//! simply finishes its current call.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::backoff::{BackoffStrategy, ExponentialBackoff};
use crate::book::BookEngine;
use crate::circuit::CircuitBreaker;
use crate::config::{ClientConfig, GapCallback, RateLimitConfig, ReconnectCallback, TelemetryConfig};
use crate::connection::Connection;
use crate::error::{ErrorEvent, ErrorKind};
use crate::gap::GapTracker;
use crate::metrics::TelemetryCounters;
use crate::queue::{Envelope, IngressQueue};
use crate::strategies::StrategyEngine;
use crate::subscription::{SubscriptionInner, SubscriptionSink};
use crate::types::{
    Balance, Channel, ConnectionState, Ohlc, Order, OrderBook, OwnTrade, Ticker, Trade,
};
use crate::wire::{self, ParsedMessage, SubscriptionAck};

type TickerCb = Arc<dyn Fn(&Ticker) + Send + Sync>;
type TradeCb = Arc<dyn Fn(&Trade) + Send + Sync>;
type BookCb = Arc<dyn Fn(&str, &OrderBook) + Send + Sync>;
type OhlcCb = Arc<dyn Fn(&Ohlc) + Send + Sync>;
type OrderCb = Arc<dyn Fn(&Order) + Send + Sync>;
type OwnTradeCb = Arc<dyn Fn(&OwnTrade) + Send + Sync>;
type BalanceCb = Arc<dyn Fn(&[Balance]) + Send + Sync>;
type ErrorCb = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;
type StateCb = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type SubscribedCb = Arc<dyn Fn(&SubscriptionAck) + Send + Sync>;

/// Registered user callbacks. Reads dominate; writes happen only when the
/// user replaces a handler.
#[derive(Default)]
pub(crate) struct CallbackTable {
    pub ticker: RwLock<Option<TickerCb>>,
    pub trade: RwLock<Option<TradeCb>>,
    pub book: RwLock<Option<BookCb>>,
    pub ohlc: RwLock<Option<OhlcCb>>,
    pub order: RwLock<Option<OrderCb>>,
    pub own_trade: RwLock<Option<OwnTradeCb>>,
    pub balance: RwLock<Option<BalanceCb>>,
    pub error: RwLock<Option<ErrorCb>>,
    pub state: RwLock<Option<StateCb>>,
    pub subscribed: RwLock<Option<SubscribedCb>>,
}

pub(crate) struct ClientCore {
    // Connection parameters
    pub url: String,
    pub connect_timeout: Duration,
    pub rate_limit: Option<RateLimitConfig>,
    pub validate_checksums: bool,
    pub offline: bool,
    pub authenticated: bool,
    auth_token: Option<String>,
    pub telemetry: TelemetryConfig,
    pub on_reconnect: Option<ReconnectCallback>,
    pub on_gap: Option<GapCallback>,

    // Pipeline
    pub queue: Option<IngressQueue>,
    pub callbacks: CallbackTable,
    pub subscriptions: Mutex<BTreeMap<u64, Arc<SubscriptionInner>>>,
    pub next_sub_id: AtomicU64,
    pub tickers: RwLock<HashMap<String, Ticker>>,
    pub books: RwLock<BookEngine>,
    pub strategies: StrategyEngine,
    pub gaps: GapTracker,
    pub breaker: CircuitBreaker,
    pub backoff: Mutex<Box<dyn BackoffStrategy + Send>>,
    pub counters: TelemetryCounters,

    // Lifecycle
    pub connection: RwLock<Option<Arc<Connection>>>,
    state: Mutex<ConnectionState>,
    pub running: AtomicBool,
    pub stop_requested: AtomicBool,
    stop_lock: Mutex<()>,
    stop_cv: Condvar,
}

impl ClientCore {
    pub fn new(mut config: ClientConfig) -> Arc<Self> {
        let backoff = config
            .backoff
            .take()
            .unwrap_or_else(ExponentialBackoff::conservative);
        let queue = config
            .use_queue
            .then(|| IngressQueue::new(config.queue_capacity));
        let auth_token = config.auth_token();

        Arc::new(Self {
            url: config.url.clone(),
            connect_timeout: config.connect_timeout,
            rate_limit: config.rate_limit,
            validate_checksums: config.validate_checksums,
            offline: config.offline_mode,
            authenticated: config.is_authenticated(),
            auth_token,
            telemetry: config.telemetry.clone(),
            on_reconnect: config.on_reconnect.clone(),
            on_gap: config.on_gap.clone(),

            queue,
            callbacks: CallbackTable::default(),
            subscriptions: Mutex::new(BTreeMap::new()),
            next_sub_id: AtomicU64::new(1),
            tickers: RwLock::new(HashMap::new()),
            books: RwLock::new(BookEngine::new()),
            strategies: StrategyEngine::new(),
            gaps: GapTracker::new(config.gap.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            backoff: Mutex::new(backoff),
            counters: TelemetryCounters::new(),

            connection: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_lock: Mutex::new(()),
            stop_cv: Condvar::new(),
        })
    }

    // =========================================================================
    // STATE
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return;
            }
            info!(from = %*state, to = %new_state, "connection_state");
            *state = new_state;
        }
        if let Some(cb) = self.callbacks.state.read().clone() {
            self.guarded("connection_state", &new_state.to_string(), || cb(new_state));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self
                .connection
                .read()
                .as_ref()
                .is_some_and(|conn| conn.is_open())
    }

    /// Block the calling thread until `stop()` is requested.
    pub fn wait_for_stop(&self) {
        let mut guard = self.stop_lock.lock();
        while !self.stop_requested.load(Ordering::Acquire) {
            self.stop_cv.wait(&mut guard);
        }
    }

    pub fn notify_stop(&self) {
        let _guard = self.stop_lock.lock();
        self.stop_cv.notify_all();
    }

    // =========================================================================
    // CALLBACK EMISSION
    // =========================================================================

    /// Run a user callback inside the panic barrier. A panic becomes a
    /// `CallbackError` event; the pipeline continues.
    pub fn guarded(&self, what: &str, detail: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            self.emit_error(ErrorEvent::with_details(
                ErrorKind::CallbackError,
                format!("{what} callback panicked"),
                detail.to_string(),
            ));
        }
    }

    /// Deliver an error event. A panic from the error callback itself is
    /// swallowed; there is nowhere left to report it.
    pub fn emit_error(&self, event: ErrorEvent) {
        debug!(kind = %event.kind, message = %event.message, "error_event");
        if let Some(cb) = self.callbacks.error.read().clone() {
            let _ = catch_unwind(AssertUnwindSafe(|| cb(&event)));
        }
    }

    pub fn emit_ticker(&self, ticker: &Ticker) {
        if let Some(cb) = self.callbacks.ticker.read().clone() {
            self.guarded("ticker", &ticker.symbol, || cb(ticker));
        }
    }

    pub fn emit_trade(&self, trade: &Trade) {
        if let Some(cb) = self.callbacks.trade.read().clone() {
            self.guarded("trade", &trade.symbol, || cb(trade));
        }
    }

    pub fn emit_book(&self, symbol: &str, book: &OrderBook) {
        if let Some(cb) = self.callbacks.book.read().clone() {
            self.guarded("book", symbol, || cb(symbol, book));
        }
    }

    pub fn emit_ohlc(&self, ohlc: &Ohlc) {
        if let Some(cb) = self.callbacks.ohlc.read().clone() {
            self.guarded("ohlc", &ohlc.symbol, || cb(ohlc));
        }
    }

    pub fn emit_order(&self, order: &Order) {
        if let Some(cb) = self.callbacks.order.read().clone() {
            self.guarded("order", &order.order_id, || cb(order));
        }
    }

    pub fn emit_own_trade(&self, trade: &OwnTrade) {
        if let Some(cb) = self.callbacks.own_trade.read().clone() {
            self.guarded("own_trade", &trade.trade_id, || cb(trade));
        }
    }

    pub fn emit_balances(&self, balances: &[Balance]) {
        if let Some(cb) = self.callbacks.balance.read().clone() {
            self.guarded("balance", "balances", || cb(balances));
        }
    }

    pub fn emit_subscribed(&self, ack: &SubscriptionAck) {
        if let Some(cb) = self.callbacks.subscribed.read().clone() {
            self.guarded("subscribed", ack.channel.wire_name(), || cb(ack));
        }
    }

    // =========================================================================
    // INGRESS
    // =========================================================================

    /// Hand a raw wire frame to the pipeline: parse, then queue or
    /// dispatch inline. Called from the reader thread.
    pub fn ingest_frame(&self, raw: &str) {
        self.counters.record_received();
        match wire::parse_message(raw) {
            Ok(message) => self.route_message(message),
            Err(e) => {
                self.counters.record_parse_error();
                let mut detail = raw.to_string();
                detail.truncate(256);
                self.emit_error(ErrorEvent::with_details(
                    ErrorKind::ParseError,
                    e.to_string(),
                    detail,
                ));
            }
        }
    }

    /// Queue a parsed message for the dispatcher, or dispatch inline when
    /// the queue is disabled. Queue overflow drops the message by policy.
    pub fn route_message(&self, message: ParsedMessage) {
        let envelope = Envelope::new(message);
        match &self.queue {
            Some(queue) => {
                if !queue.try_push(envelope) {
                    self.counters.record_dropped();
                    self.emit_error(ErrorEvent::new(
                        ErrorKind::QueueOverflow,
                        "message queue full, dropping message",
                    ));
                }
            }
            None => self.dispatch_envelope(envelope),
        }
    }

    // =========================================================================
    // OUTBOUND FRAMES
    // =========================================================================

    fn safe_send(&self, frame: &str) {
        let connection = self.connection.read().clone();
        match connection {
            Some(conn) if conn.is_open() => {
                if let Err(e) = conn.send(frame) {
                    self.emit_error(ErrorEvent::with_details(
                        ErrorKind::ConnectionClosed,
                        "send failed",
                        e.to_string(),
                    ));
                }
            }
            _ => {
                // Subscriptions registered while offline are replayed on
                // (re)connect; surface the condition and move on.
                self.emit_error(ErrorEvent::new(
                    ErrorKind::ConnectionClosed,
                    "cannot send: connection not open",
                ));
            }
        }
    }

    /// Resend every active, unpaused subscription. Called after each
    /// successful (re)connection while holding the registry lock.
    pub fn resubscribe_all(&self) {
        let subscriptions = self.subscriptions.lock();
        for sub in subscriptions.values() {
            if sub.wants_stream() {
                trace!(id = sub.id(), channel = %sub.channel(), "resubscribe");
                self.send_subscribe(sub.channel(), &sub.symbols(), sub.depth());
            }
        }
    }

    /// Force a fresh snapshot for one symbol by cycling its book
    /// subscriptions. Used after a checksum mismatch.
    pub fn resync_symbol(&self, symbol: &str) {
        let targets: Vec<(Vec<String>, Option<u32>)> = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .values()
                .filter(|sub| {
                    sub.channel() == Channel::Book
                        && sub.wants_stream()
                        && sub.symbols().iter().any(|s| s == symbol)
                })
                .map(|sub| (vec![symbol.to_string()], sub.depth()))
                .collect()
        };
        for (symbols, depth) in targets {
            self.send_unsubscribe(Channel::Book, &symbols);
            self.send_subscribe(Channel::Book, &symbols, depth);
        }
    }
}

impl SubscriptionSink for ClientCore {
    fn send_subscribe(&self, channel: Channel, symbols: &[String], depth: Option<u32>) {
        let frame = wire::build_subscribe(channel, symbols, depth, self.auth_token.as_deref());
        self.safe_send(&frame);
    }

    fn send_unsubscribe(&self, channel: Channel, symbols: &[String]) {
        let frame = wire::build_unsubscribe(channel, symbols, self.auth_token.as_deref());
        self.safe_send(&frame);
    }
}
