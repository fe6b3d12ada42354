//! Subscription lifecycle and the public subscription handle.
//!
//! Each subscription owns its small state under a per-item mutex; the
//! client's registry only serializes insertion and resubscribe iteration.
//! Handles reach back into the client through a weak reference, so a
//! handle kept alive past the client never forms an ownership cycle and
//! its operations degrade to local state changes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::KrakenError;
use crate::types::Channel;

pub(crate) const MAX_SYMBOL_LEN: usize = 256;

/// Frame-sending surface the client core exposes to subscriptions.
pub(crate) trait SubscriptionSink: Send + Sync {
    fn send_subscribe(&self, channel: Channel, symbols: &[String], depth: Option<u32>);
    fn send_unsubscribe(&self, channel: Channel, symbols: &[String]);
}

pub(crate) fn validate_symbols(symbols: &[String]) -> Result<(), KrakenError> {
    if symbols.is_empty() {
        return Err(KrakenError::InvalidArgument(
            "symbols cannot be empty".into(),
        ));
    }
    for symbol in symbols {
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            return Err(KrakenError::InvalidArgument(format!(
                "invalid symbol (empty or longer than {MAX_SYMBOL_LEN} bytes)"
            )));
        }
    }
    Ok(())
}

#[derive(Debug)]
struct SubState {
    symbols: Vec<String>,
    depth: Option<u32>,
    active: bool,
    paused: bool,
}

pub(crate) struct SubscriptionInner {
    id: u64,
    channel: Channel,
    state: Mutex<SubState>,
    sink: Weak<dyn SubscriptionSink>,
}

impl SubscriptionInner {
    pub fn new(
        id: u64,
        channel: Channel,
        symbols: Vec<String>,
        depth: Option<u32>,
        sink: Weak<dyn SubscriptionSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            channel,
            state: Mutex::new(SubState {
                symbols,
                depth,
                active: true,
                paused: false,
            }),
            sink,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn symbols(&self) -> Vec<String> {
        self.state.lock().symbols.clone()
    }

    pub fn depth(&self) -> Option<u32> {
        self.state.lock().depth
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Whether the client should (re)send this subscription's frame.
    pub fn wants_stream(&self) -> bool {
        let state = self.state.lock();
        state.active && !state.paused
    }

    fn with_sink(&self, f: impl FnOnce(&dyn SubscriptionSink)) {
        if let Some(sink) = self.sink.upgrade() {
            f(sink.as_ref());
        }
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if !state.active || state.paused {
            return;
        }
        state.paused = true;
        let symbols = state.symbols.clone();
        drop(state);
        self.with_sink(|sink| sink.send_unsubscribe(self.channel, &symbols));
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.active || !state.paused {
            return;
        }
        state.paused = false;
        let symbols = state.symbols.clone();
        let depth = state.depth;
        drop(state);
        self.with_sink(|sink| sink.send_subscribe(self.channel, &symbols, depth));
    }

    /// Terminal: further mutations are no-ops.
    pub fn unsubscribe(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.active = false;
        state.paused = false;
        let symbols = state.symbols.clone();
        drop(state);
        self.with_sink(|sink| sink.send_unsubscribe(self.channel, &symbols));
    }

    /// Union new symbols into the set, preserving order and skipping
    /// duplicates. The subscribe frame covers only the added delta.
    pub fn add_symbols(&self, new_symbols: &[String]) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        let mut added = Vec::new();
        for symbol in new_symbols {
            if !state.symbols.contains(symbol) {
                state.symbols.push(symbol.clone());
                added.push(symbol.clone());
            }
        }
        let send = !state.paused && !added.is_empty();
        let depth = state.depth;
        drop(state);
        if send {
            self.with_sink(|sink| sink.send_subscribe(self.channel, &added, depth));
        }
    }

    /// Remove symbols from the set; the unsubscribe frame covers only the
    /// removed delta.
    pub fn remove_symbols(&self, rem_symbols: &[String]) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        let mut removed = Vec::new();
        for symbol in rem_symbols {
            if let Some(i) = state.symbols.iter().position(|s| s == symbol) {
                state.symbols.remove(i);
                removed.push(symbol.clone());
            }
        }
        let send = !state.paused && !removed.is_empty();
        drop(state);
        if send {
            self.with_sink(|sink| sink.send_unsubscribe(self.channel, &removed));
        }
    }
}

/// Handle to a live subscription. Cloning shares the underlying
/// subscription; dropping all handles does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn from_inner(inner: Arc<SubscriptionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn channel(&self) -> Channel {
        self.inner.channel()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.inner.symbols()
    }

    pub fn depth(&self) -> Option<u32> {
        self.inner.depth()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    /// Stop the stream without giving up the subscription's symbol set.
    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Resume a paused stream with the current symbols and depth.
    pub fn resume(&self) {
        self.inner.resume();
    }

    /// Cancel permanently. Idempotent; the handle stays inert afterwards.
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    pub fn add_symbols(&self, symbols: &[String]) {
        self.inner.add_symbols(symbols);
    }

    pub fn remove_symbols(&self, symbols: &[String]) {
        self.inner.remove_symbols(symbols);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("channel", &self.channel())
            .field("symbols", &self.symbols())
            .field("active", &self.is_active())
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl SubscriptionSink for RecordingSink {
        fn send_subscribe(&self, channel: Channel, symbols: &[String], _depth: Option<u32>) {
            self.calls
                .lock()
                .push(format!("sub:{}:{}", channel, symbols.join(",")));
        }

        fn send_unsubscribe(&self, channel: Channel, symbols: &[String]) {
            self.calls
                .lock()
                .push(format!("unsub:{}:{}", channel, symbols.join(",")));
        }
    }

    fn make(
        channel: Channel,
        symbols: &[&str],
    ) -> (Arc<RecordingSink>, Arc<SubscriptionInner>) {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn SubscriptionSink> =
            Arc::downgrade(&(sink.clone() as Arc<dyn SubscriptionSink>));
        let inner = SubscriptionInner::new(
            1,
            channel,
            symbols.iter().map(|s| s.to_string()).collect(),
            None,
            weak,
        );
        (sink, inner)
    }

    #[test]
    fn test_validate_symbols() {
        assert!(validate_symbols(&["BTC/USD".to_string()]).is_ok());
        assert!(matches!(
            validate_symbols(&[]),
            Err(KrakenError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_symbols(&[String::new()]),
            Err(KrakenError::InvalidArgument(_))
        ));
        let long = "X".repeat(MAX_SYMBOL_LEN + 1);
        assert!(matches!(
            validate_symbols(&[long]),
            Err(KrakenError::InvalidArgument(_))
        ));
        let boundary = "X".repeat(MAX_SYMBOL_LEN);
        assert!(validate_symbols(&[boundary]).is_ok());
    }

    #[test]
    fn test_pause_resume() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD"]);
        assert!(sub.is_active());
        assert!(!sub.is_paused());

        sub.pause();
        assert!(sub.is_paused());
        assert!(sub.is_active());

        sub.pause(); // idempotent
        sub.resume();
        assert!(!sub.is_paused());
        sub.resume(); // idempotent

        assert_eq!(
            sink.calls(),
            vec!["unsub:ticker:BTC/USD", "sub:ticker:BTC/USD"]
        );
    }

    #[test]
    fn test_unsubscribe_is_terminal() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD"]);
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(!sub.is_paused());

        // All further mutations are no-ops.
        sub.unsubscribe();
        sub.pause();
        sub.resume();
        sub.add_symbols(&["ETH/USD".to_string()]);
        sub.remove_symbols(&["BTC/USD".to_string()]);

        assert_eq!(sub.symbols(), vec!["BTC/USD".to_string()]);
        assert_eq!(sink.calls(), vec!["unsub:ticker:BTC/USD"]);
    }

    #[test]
    fn test_add_symbols_sends_delta_only() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD"]);
        sub.add_symbols(&["BTC/USD".to_string(), "ETH/USD".to_string()]);

        assert_eq!(
            sub.symbols(),
            vec!["BTC/USD".to_string(), "ETH/USD".to_string()]
        );
        // Only the genuinely new symbol is subscribed.
        assert_eq!(sink.calls(), vec!["sub:ticker:ETH/USD"]);
    }

    #[test]
    fn test_remove_symbols() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD", "ETH/USD"]);
        sub.remove_symbols(&["BTC/USD".to_string(), "SOL/USD".to_string()]);

        assert_eq!(sub.symbols(), vec!["ETH/USD".to_string()]);
        assert_eq!(sink.calls(), vec!["unsub:ticker:BTC/USD"]);
    }

    #[test]
    fn test_mutations_while_paused_do_not_send() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD"]);
        sub.pause();
        sub.add_symbols(&["ETH/USD".to_string()]);
        sub.remove_symbols(&["BTC/USD".to_string()]);

        assert_eq!(sub.symbols(), vec!["ETH/USD".to_string()]);
        // Only the pause's unsubscribe went out.
        assert_eq!(sink.calls(), vec!["unsub:ticker:BTC/USD"]);

        // Resume sends the current symbol set.
        sub.resume();
        assert_eq!(
            sink.calls(),
            vec!["unsub:ticker:BTC/USD", "sub:ticker:ETH/USD"]
        );
    }

    #[test]
    fn test_dead_sink_degrades_to_local_state() {
        let (sink, sub) = make(Channel::Ticker, &["BTC/USD"]);
        drop(sink);
        sub.pause();
        assert!(sub.is_paused());
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_handle_clone_shares_state() {
        let (_sink, inner) = make(Channel::Trade, &["BTC/USD"]);
        let handle = Subscription::from_inner(inner);
        let other = handle.clone();
        handle.pause();
        assert!(other.is_paused());
        assert_eq!(other.id(), handle.id());
        assert_eq!(other.channel(), Channel::Trade);
    }
}
