//! Market data model: channels, public feed records, private account
//! records, and the events delivered to user callbacks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// CHANNELS
// =============================================================================

/// Subscription channel. `Order`, `OwnTrade` and `Balance` are private and
/// require API credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ticker,
    Trade,
    Book,
    Ohlc,
    Order,
    OwnTrade,
    Balance,
}

impl Channel {
    /// Channel name on the v2 wire. Order state and own-trade fills both
    /// ride the `executions` channel.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Book => "book",
            Self::Ohlc => "ohlc",
            Self::Order | Self::OwnTrade => "executions",
            Self::Balance => "balances",
        }
    }

    /// Canonical channel for a wire name. `executions` maps to `Order`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ticker" => Some(Self::Ticker),
            "trade" => Some(Self::Trade),
            "book" => Some(Self::Book),
            "ohlc" => Some(Self::Ohlc),
            "executions" => Some(Self::Order),
            "balances" => Some(Self::Balance),
            _ => None,
        }
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Order | Self::OwnTrade | Self::Balance)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// =============================================================================
// SIDES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PUBLIC FEED RECORDS
// =============================================================================

/// Best bid/ask, last price and 24h statistics for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
    pub high: f64,
    pub low: f64,
    pub timestamp: String,
}

impl Ticker {
    #[inline]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// A public trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    pub timestamp: String,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

/// Sorted ladders of (price, qty). Bids are descending in price, asks
/// ascending; no level carries zero quantity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Checksum published by the exchange with the most recent frame.
    pub checksum: u32,
}

impl OrderBook {
    #[inline]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((a.price + b.price) / 2.0),
            _ => None,
        }
    }
}

/// One OHLC candle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ohlc {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: u32,
    pub timestamp: String,
}

// =============================================================================
// PRIVATE ACCOUNT RECORDS
// =============================================================================

/// Open-order state from the executions channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: Option<Side>,
    pub order_type: String,
    pub status: String,
    pub price: f64,
    pub quantity: f64,
    pub filled: f64,
    pub remaining: f64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Order {
    pub fn fill_percentage(&self) -> f64 {
        if self.quantity <= 0.0 {
            return 0.0;
        }
        (self.filled / self.quantity) * 100.0
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.filled >= self.quantity
    }
}

/// A fill on one of the account's own orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnTrade {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Option<Side>,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub fee_currency: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl OwnTrade {
    #[inline]
    pub fn value(&self) -> f64 {
        self.price * self.quantity
    }

    #[inline]
    pub fn net_value(&self) -> f64 {
        self.value() - self.fee
    }
}

/// Balance of one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: f64,
    pub reserved: f64,
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Connection lifecycle state. Transitions are monotone except the
/// `Connected -> Reconnecting -> Connected` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Fired by an alert strategy.
#[derive(Debug, Clone)]
pub struct Alert {
    pub strategy_name: String,
    pub symbol: String,
    pub message: String,
    pub price: f64,
    pub triggered_at: DateTime<Utc>,
}

/// Delivered to the reconnect callback before each reconnection attempt.
#[derive(Debug, Clone)]
pub struct ReconnectEvent {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Delivered to the gap callback when a sequence gap exceeds tolerance.
#[derive(Debug, Clone)]
pub struct GapEvent {
    pub channel: Channel,
    pub symbol: String,
    pub last_seq: u64,
    pub current_seq: u64,
    pub gap_size: u64,
}
