//! The public client.
//!
//! [`KrakenClient`] is a thin handle over an internal `Arc`'d core shared
//! with the reader and dispatcher threads; the internal types are not part
//! of the API. All methods are callable from any thread.

mod core;
mod dispatch;
mod reconnect;

pub(crate) use self::core::ClientCore;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{ClientConfig, TelemetryConfig};
use crate::error::{ErrorEvent, KrakenError};
use crate::metrics::Metrics;
use crate::replay::ReplayHandle;
use crate::strategies::{AlertStrategy, StrategyEngine};
use crate::subscription::{validate_symbols, Subscription, SubscriptionInner, SubscriptionSink};
use crate::types::{
    Alert, Balance, Channel, ConnectionState, Ohlc, Order, OrderBook, OwnTrade, Ticker, Trade,
};
use crate::wire::SubscriptionAck;

/// Streaming market-data client for Kraken's v2 WebSocket API.
///
/// ```no_run
/// use kraken_stream::{Channel, KrakenClient};
///
/// let client = KrakenClient::new();
/// client.on_ticker(|ticker| {
///     println!("{}: {}", ticker.symbol, ticker.last);
/// });
/// client.subscribe(Channel::Ticker, ["BTC/USD"]).unwrap();
/// client.run();
/// ```
pub struct KrakenClient {
    core: Arc<ClientCore>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for KrakenClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KrakenClient {
    /// Client with the default configuration (public endpoint, conservative
    /// backoff, checksum validation on).
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            core: ClientCore::new(config),
            reader_handle: Mutex::new(None),
            dispatcher_handle: Mutex::new(None),
        }
    }

    // =========================================================================
    // CALLBACKS
    // =========================================================================

    pub fn on_ticker(&self, callback: impl Fn(&Ticker) + Send + Sync + 'static) {
        *self.core.callbacks.ticker.write() = Some(Arc::new(callback));
    }

    pub fn on_trade(&self, callback: impl Fn(&Trade) + Send + Sync + 'static) {
        *self.core.callbacks.trade.write() = Some(Arc::new(callback));
    }

    pub fn on_book(&self, callback: impl Fn(&str, &OrderBook) + Send + Sync + 'static) {
        *self.core.callbacks.book.write() = Some(Arc::new(callback));
    }

    pub fn on_ohlc(&self, callback: impl Fn(&Ohlc) + Send + Sync + 'static) {
        *self.core.callbacks.ohlc.write() = Some(Arc::new(callback));
    }

    pub fn on_order(&self, callback: impl Fn(&Order) + Send + Sync + 'static) {
        *self.core.callbacks.order.write() = Some(Arc::new(callback));
    }

    pub fn on_own_trade(&self, callback: impl Fn(&OwnTrade) + Send + Sync + 'static) {
        *self.core.callbacks.own_trade.write() = Some(Arc::new(callback));
    }

    pub fn on_balance(&self, callback: impl Fn(&[Balance]) + Send + Sync + 'static) {
        *self.core.callbacks.balance.write() = Some(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        *self.core.callbacks.error.write() = Some(Arc::new(callback));
    }

    pub fn on_connection_state(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.core.callbacks.state.write() = Some(Arc::new(callback));
    }

    pub fn on_subscribed(&self, callback: impl Fn(&SubscriptionAck) + Send + Sync + 'static) {
        *self.core.callbacks.subscribed.write() = Some(Arc::new(callback));
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscribe to a public channel for a set of symbols, or to a private
    /// channel (symbols ignored; requires credentials).
    pub fn subscribe<I, S>(&self, channel: Channel, symbols: I) -> Result<Subscription, KrakenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        self.subscribe_impl(channel, symbols, None)
    }

    /// Subscribe to the order book at the given depth.
    pub fn subscribe_book<I, S>(&self, symbols: I, depth: u32) -> Result<Subscription, KrakenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        self.subscribe_impl(Channel::Book, symbols, Some(depth))
    }

    /// Subscribe to open-order state updates. Requires credentials.
    pub fn subscribe_open_orders(&self) -> Result<Subscription, KrakenError> {
        self.subscribe_impl(Channel::Order, Vec::new(), None)
    }

    /// Subscribe to fills on the account's own orders. Requires
    /// credentials.
    pub fn subscribe_own_trades(&self) -> Result<Subscription, KrakenError> {
        self.subscribe_impl(Channel::OwnTrade, Vec::new(), None)
    }

    /// Subscribe to balance updates. Requires credentials.
    pub fn subscribe_balances(&self) -> Result<Subscription, KrakenError> {
        self.subscribe_impl(Channel::Balance, Vec::new(), None)
    }

    fn subscribe_impl(
        &self,
        channel: Channel,
        symbols: Vec<String>,
        depth: Option<u32>,
    ) -> Result<Subscription, KrakenError> {
        if channel.is_private() {
            if !self.core.authenticated {
                return Err(KrakenError::Authentication(
                    "private channels require an API key and secret".into(),
                ));
            }
        } else {
            validate_symbols(&symbols)?;
        }

        let id = self.core.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let sink: Weak<dyn SubscriptionSink> =
            Arc::downgrade(&(self.core.clone() as Arc<dyn SubscriptionSink>));
        let inner = SubscriptionInner::new(id, channel, symbols.clone(), depth, sink);
        self.core.subscriptions.lock().insert(id, inner.clone());

        self.core.send_subscribe(channel, &symbols, depth);
        info!(id, channel = %channel, symbols = symbols.len(), "subscribed");
        Ok(Subscription::from_inner(inner))
    }

    // =========================================================================
    // ALERT STRATEGIES
    // =========================================================================

    /// Register an alert strategy with its callback. Returns the alert id.
    pub fn add_alert(
        &self,
        strategy: impl AlertStrategy + 'static,
        callback: impl Fn(&Alert) + Send + Sync + 'static,
    ) -> u64 {
        self.strategy_engine()
            .add(Box::new(strategy), Arc::new(callback))
    }

    pub fn remove_alert(&self, alert_id: u64) {
        self.strategy_engine().remove(alert_id);
    }

    pub fn enable_alert(&self, alert_id: u64) {
        self.strategy_engine().enable(alert_id);
    }

    pub fn disable_alert(&self, alert_id: u64) {
        self.strategy_engine().disable(alert_id);
    }

    pub fn is_alert_enabled(&self, alert_id: u64) -> bool {
        self.strategy_engine().is_enabled(alert_id)
    }

    pub fn alert_count(&self) -> usize {
        self.strategy_engine().count()
    }

    /// Registered alerts as `(id, strategy name)` pairs.
    pub fn get_alerts(&self) -> Vec<(u64, String)> {
        self.strategy_engine().list()
    }

    fn strategy_engine(&self) -> &StrategyEngine {
        &self.core.strategies
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start the client and block until [`stop`](Self::stop). In offline
    /// mode this returns once the dispatcher is up, since there is no
    /// connection to wait on.
    pub fn run(&self) {
        self.run_async();
        if self.core.offline {
            return;
        }
        self.core.wait_for_stop();
    }

    /// Start reader and dispatcher threads and return immediately.
    pub fn run_async(&self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            warn!("client already running");
            return;
        }
        self.core.stop_requested.store(false, Ordering::SeqCst);

        if self.core.queue.is_some() {
            let core = self.core.clone();
            let handle = std::thread::Builder::new()
                .name("kraken-dispatch".into())
                .spawn(move || dispatch::dispatcher_loop(core))
                .expect("failed to spawn dispatcher thread");
            *self.dispatcher_handle.lock() = Some(handle);
        }

        if !self.core.offline {
            let core = self.core.clone();
            let handle = std::thread::Builder::new()
                .name("kraken-reader".into())
                .spawn(move || reconnect::reader_loop(core))
                .expect("failed to spawn reader thread");
            *self.reader_handle.lock() = Some(handle);
        }

        info!(offline = self.core.offline, "client_started");
    }

    /// Stop the client: signal both threads, close the connection, join.
    /// Idempotent.
    pub fn stop(&self) {
        let was_running = self.core.running.swap(false, Ordering::SeqCst);
        self.core.stop_requested.store(true, Ordering::SeqCst);
        self.core.notify_stop();

        let connection = self.core.connection.write().take();
        if let Some(connection) = connection {
            connection.close();
        }
        if let Some(handle) = self.reader_handle.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatcher_handle.lock().take() {
            let _ = handle.join();
        }
        self.core.set_state(ConnectionState::Disconnected);
        if was_running {
            info!("client_stopped");
        }
    }

    /// Close the connection without stopping the client machinery. The
    /// reader exits without reconnecting; safe to call when not connected.
    pub fn disconnect(&self) {
        let connection = self.core.connection.write().take();
        if let Some(connection) = connection {
            connection.close();
        }
        self.core.set_state(ConnectionState::Disconnected);
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.state()
    }

    // =========================================================================
    // SNAPSHOTS & METRICS
    // =========================================================================

    /// Most recent ticker for a symbol, if one has been received.
    pub fn latest_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.core.tickers.read().get(symbol).cloned()
    }

    /// Most recent order book for a symbol, if one has been received.
    pub fn latest_book(&self, symbol: &str) -> Option<OrderBook> {
        self.core.books.read().get(symbol).cloned()
    }

    pub fn all_tickers(&self) -> std::collections::HashMap<String, Ticker> {
        self.core.tickers.read().clone()
    }

    /// Total sequence gaps detected on private streams.
    pub fn gap_count(&self) -> u64 {
        self.core.gaps.gap_count()
    }

    pub fn get_metrics(&self) -> Metrics {
        let depth = self
            .core
            .queue
            .as_ref()
            .map(|queue| queue.depth())
            .unwrap_or(0);
        self.core.counters.snapshot(depth, self.core.state())
    }

    pub fn telemetry(&self) -> &TelemetryConfig {
        &self.core.telemetry
    }

    /// How many times alerts from the named strategy have fired.
    pub fn alert_trigger_count(&self, strategy_name: &str) -> u64 {
        self.core.counters.alerts_for(strategy_name)
    }

    /// Offline message injector feeding the normal dispatch path. Intended
    /// for clients built with `offline_mode(true)`.
    pub fn replay(&self) -> ReplayHandle {
        ReplayHandle::new(self.core.clone())
    }
}

impl Drop for KrakenClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_construction() {
        let client = KrakenClient::new();
        assert!(!client.is_connected());
        assert!(!client.is_running());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_callback_registration_without_connection() {
        let client = KrakenClient::new();
        client.on_ticker(|_| {});
        client.on_trade(|_| {});
        client.on_book(|_, _| {});
        client.on_ohlc(|_| {});
        client.on_error(|_| {});
        client.on_connection_state(|_| {});
        client.on_subscribed(|_| {});
        // Private-channel callbacks never require authentication.
        client.on_order(|_| {});
        client.on_own_trade(|_| {});
        client.on_balance(|_| {});
    }

    #[test]
    fn test_stop_when_not_running() {
        let client = KrakenClient::new();
        client.stop();
        client.stop();
        client.disconnect();
    }

    #[test]
    fn test_initial_metrics() {
        let client = KrakenClient::new();
        let metrics = client.get_metrics();
        assert_eq!(metrics.messages_received, 0);
        assert_eq!(metrics.messages_processed, 0);
        assert_eq!(metrics.messages_dropped, 0);
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_snapshots_empty() {
        let client = KrakenClient::new();
        assert!(client.latest_ticker("BTC/USD").is_none());
        assert!(client.latest_book("BTC/USD").is_none());
        assert!(client.all_tickers().is_empty());
        assert_eq!(client.gap_count(), 0);
    }
}
