//! Dispatcher: drains the ingress queue and applies messages to local
//! state, then fans out to user callbacks and the strategy engine.
//!
//! Ordering is arrival order; nothing is reordered. The dispatcher is the
//! sole writer of the snapshot maps, so readers on user threads only ever
//! see fully applied updates.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use super::core::ClientCore;
use crate::book::BookEngine;
use crate::error::{ErrorEvent, ErrorKind};
use crate::queue::Envelope;
use crate::types::{Balance, Channel, Order, OwnTrade, Ticker};
use crate::wire::{BookPayload, ParsedMessage};

/// Poll interval while the queue is empty. Bounded so the stop flag is
/// observed promptly.
const EMPTY_POLL: Duration = Duration::from_millis(1);

/// Dispatcher thread body. Drains remaining messages after stop is
/// requested, then exits.
pub(crate) fn dispatcher_loop(core: Arc<ClientCore>) {
    let Some(queue) = core.queue.as_ref() else {
        return;
    };
    loop {
        match queue.pop() {
            Some(envelope) => core.dispatch_envelope(envelope),
            None => {
                if core.stop_requested.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(EMPTY_POLL);
            }
        }
    }
    trace!("dispatcher_exited");
}

impl ClientCore {
    /// Apply one message: update local state, run callbacks, feed the
    /// strategy engine, track gaps.
    pub(crate) fn dispatch_envelope(&self, envelope: Envelope) {
        self.counters.record_latency(envelope.received_at.elapsed());

        match envelope.message {
            ParsedMessage::Ticker(tickers) => {
                for ticker in &tickers {
                    self.apply_ticker(ticker);
                }
            }
            ParsedMessage::Trade(trades) => {
                for trade in &trades {
                    self.emit_trade(trade);
                }
            }
            ParsedMessage::BookSnapshot(payloads) => {
                for payload in &payloads {
                    self.apply_book(payload, true);
                }
            }
            ParsedMessage::BookUpdate(payloads) => {
                for payload in &payloads {
                    self.apply_book(payload, false);
                }
            }
            ParsedMessage::Ohlc(candles) => {
                for candle in &candles {
                    self.emit_ohlc(candle);
                }
            }
            ParsedMessage::Order(orders) => {
                for order in &orders {
                    self.apply_order(order);
                }
            }
            ParsedMessage::OwnTrade(trades) => {
                for trade in &trades {
                    self.apply_own_trade(trade);
                }
            }
            ParsedMessage::BalanceSnapshot(balances) => {
                self.apply_balances(&balances);
            }
            ParsedMessage::Subscribed(ack) => {
                trace!(channel = %ack.channel, success = ack.success, "subscribed_ack");
                self.emit_subscribed(&ack);
            }
            ParsedMessage::Unsubscribed(ack) => {
                trace!(channel = %ack.channel, "unsubscribed_ack");
            }
            ParsedMessage::Heartbeat => {}
            ParsedMessage::Status(status) => {
                info!(system = %status.system, version = %status.version, "exchange_status");
            }
            ParsedMessage::Error(text) => {
                self.apply_exchange_error(text);
            }
            ParsedMessage::Unknown => {
                trace!("unknown_frame");
            }
        }

        self.counters.record_processed();
    }

    fn apply_ticker(&self, ticker: &Ticker) {
        self.tickers
            .write()
            .insert(ticker.symbol.clone(), ticker.clone());
        self.emit_ticker(ticker);

        let fired = self
            .strategies
            .dispatch(ticker, &|event| self.emit_error(event));
        for name in fired {
            self.counters.record_alert(&name);
        }
    }

    fn apply_book(&self, payload: &BookPayload, snapshot: bool) {
        let (book, mismatch) = {
            let mut books = self.books.write();
            let book = if snapshot {
                books.apply_snapshot(payload)
            } else {
                books.apply_update(payload)
            };

            let mismatch = match payload.checksum {
                Some(published) if self.validate_checksums => {
                    let computed = BookEngine::compute_checksum(book);
                    (computed != published).then_some((computed, published))
                }
                _ => None,
            };
            (book.clone(), mismatch)
        };

        self.emit_book(&payload.symbol, &book);

        if let Some((computed, published)) = mismatch {
            self.counters.record_checksum_failure();
            warn!(
                symbol = %payload.symbol,
                computed,
                published,
                "book_checksum_mismatch"
            );
            self.emit_error(ErrorEvent::with_details(
                ErrorKind::ChecksumMismatch,
                format!("book checksum mismatch for {}", payload.symbol),
                format!("computed={computed} published={published}"),
            ));
            self.resync_symbol(&payload.symbol);
        }
    }

    fn apply_order(&self, order: &Order) {
        if let Some(seq) = order.seq {
            let key = if order.symbol.is_empty() {
                "account"
            } else {
                &order.symbol
            };
            self.observe_gap(Channel::Order, key, seq);
        }
        self.emit_order(order);
    }

    fn apply_own_trade(&self, trade: &OwnTrade) {
        if let Some(seq) = trade.seq {
            let key = if trade.symbol.is_empty() {
                "account"
            } else {
                &trade.symbol
            };
            self.observe_gap(Channel::OwnTrade, key, seq);
        }
        self.emit_own_trade(trade);
    }

    fn apply_balances(&self, balances: &[Balance]) {
        for balance in balances {
            if let Some(seq) = balance.seq {
                self.observe_gap(Channel::Balance, &balance.asset, seq);
            }
        }
        self.emit_balances(balances);
    }

    fn observe_gap(&self, channel: Channel, key: &str, seq: u64) {
        if let Some(event) = self.gaps.observe(channel, key, seq) {
            self.counters.record_gap();
            warn!(
                channel = %event.channel,
                symbol = %event.symbol,
                gap_size = event.gap_size,
                "sequence_gap"
            );
            if let Some(cb) = &self.on_gap {
                let cb = cb.clone();
                self.guarded("gap", &event.symbol, || cb(&event));
            }
        }
    }

    /// `{"error": ...}` frames from the exchange. The fixed error-kind set
    /// has no dedicated exchange-error kind; symbol complaints map to
    /// `InvalidSymbol`, everything else to `ParseError`.
    fn apply_exchange_error(&self, text: String) {
        let lowered = text.to_lowercase();
        let kind = if lowered.contains("symbol") || lowered.contains("pair") {
            ErrorKind::InvalidSymbol
        } else {
            ErrorKind::ParseError
        };
        self.emit_error(ErrorEvent::with_details(kind, text, "exchange error"));
    }
}
