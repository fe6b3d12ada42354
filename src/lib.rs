//! Threaded client for Kraken's v2 WebSocket market-data service.
//!
//! The client maintains one persistent TLS WebSocket session, multiplexes
//! subscriptions onto it, parses streaming JSON frames on a reader thread,
//! hands them to a dispatcher thread over a bounded lock-free queue, and
//! fans out to registered callbacks. Order books are validated against the
//! exchange's top-of-book checksum; transport faults are absorbed by an
//! exponential-backoff reconnect loop gated by a circuit breaker; private
//! streams are watched for sequence gaps; user-supplied alert strategies
//! run over the ticker stream.
//!
//! ```no_run
//! use kraken_stream::{Channel, KrakenClient, PriceAlert};
//!
//! let client = KrakenClient::new();
//! client.on_ticker(|t| println!("{} last={}", t.symbol, t.last));
//! client.subscribe(Channel::Ticker, ["BTC/USD"]).unwrap();
//! client.add_alert(
//!     PriceAlert::builder().symbol("BTC/USD").above(100_000.0).build(),
//!     |alert| println!("ALERT: {}", alert.message),
//! );
//! client.run();
//! ```

mod backoff;
mod book;
mod circuit;
mod client;
mod config;
mod connection;
mod error;
mod gap;
mod metrics;
mod queue;
mod replay;
mod strategies;
mod subscription;
mod types;
mod wire;

pub use backoff::{
    BackoffStrategy, ExponentialBackoff, ExponentialBackoffBuilder, FixedBackoff, NoBackoff,
};
pub use book::{BookEngine, CHECKSUM_DEPTH};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::KrakenClient;
pub use config::{
    ClientConfig, ClientConfigBuilder, RateLimitConfig, TelemetryConfig, DEFAULT_AUTH_URL,
    DEFAULT_URL,
};
pub use error::{ErrorEvent, ErrorKind, KrakenError};
pub use gap::{GapConfig, GapTracker};
pub use metrics::Metrics;
pub use replay::ReplayHandle;
pub use strategies::{
    AlertStrategy, PriceAlert, PriceAlertBuilder, SpreadAlert, SpreadAlertBuilder, VolumeSpike,
    VolumeSpikeBuilder,
};
pub use subscription::Subscription;
pub use types::{
    Alert, Balance, BookLevel, Channel, ConnectionState, GapEvent, Ohlc, Order, OrderBook,
    OwnTrade, ReconnectEvent, Side, Ticker, Trade,
};
pub use wire::{
    build_subscribe, build_unsubscribe, parse_message, BookPayload, ParsedMessage, StatusInfo,
    SubscriptionAck,
};
