//! Offline message injection.
//!
//! With `offline_mode(true)` the reader thread never starts; this handle
//! synthesizes messages and feeds them through the exact dispatch path the
//! wire would use (queued, or inline when the queue is disabled). It is
//! the testing seam for strategies, callbacks and book handling.

use std::sync::Arc;

use crate::client::ClientCore;
use crate::types::{Balance, Order, OwnTrade, Ticker, Trade};
use crate::wire::{BookPayload, ParsedMessage};

/// Injector for synthetic messages. Obtained from
/// [`KrakenClient::replay`](crate::KrakenClient::replay).
#[derive(Clone)]
pub struct ReplayHandle {
    core: Arc<ClientCore>,
}

impl ReplayHandle {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    pub fn inject_ticker(&self, ticker: Ticker) {
        self.core.route_message(ParsedMessage::Ticker(vec![ticker]));
    }

    pub fn inject_trade(&self, trade: Trade) {
        self.core.route_message(ParsedMessage::Trade(vec![trade]));
    }

    pub fn inject_book_snapshot(&self, payload: BookPayload) {
        self.core
            .route_message(ParsedMessage::BookSnapshot(vec![payload]));
    }

    pub fn inject_book_update(&self, payload: BookPayload) {
        self.core
            .route_message(ParsedMessage::BookUpdate(vec![payload]));
    }

    pub fn inject_order(&self, order: Order) {
        self.core.route_message(ParsedMessage::Order(vec![order]));
    }

    pub fn inject_own_trade(&self, trade: OwnTrade) {
        self.core.route_message(ParsedMessage::OwnTrade(vec![trade]));
    }

    pub fn inject_balances(&self, balances: Vec<Balance>) {
        self.core
            .route_message(ParsedMessage::BalanceSnapshot(balances));
    }

    /// Inject an already-parsed message.
    pub fn inject_message(&self, message: ParsedMessage) {
        self.core.route_message(message);
    }

    /// Inject a raw wire frame through the parse path, as the reader
    /// thread would. Parse failures surface via the error callback.
    pub fn inject_frame(&self, raw: &str) {
        self.core.ingest_frame(raw);
    }
}
