//! JSON codec for the v2 wire protocol.
//!
//! Inbound frames are `{"channel": ..., "type": "snapshot"|"update",
//! "data": [...]}` plus meta frames (subscribe acks, heartbeat, status,
//! errors). Numeric fields may arrive as JSON strings and are parsed as
//! 64-bit floats; `str::parse::<f64>` is locale-independent, which pins the
//! decimal format to what the exchange sends regardless of process locale.

use serde_json::{json, Map, Value};

use crate::error::KrakenError;
use crate::types::{
    Balance, BookLevel, Channel, Ohlc, Order, OwnTrade, Side, Ticker, Trade,
};

// =============================================================================
// PARSED MESSAGES
// =============================================================================

/// Book frame payload before application to the local book.
#[derive(Debug, Clone)]
pub struct BookPayload {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Top-of-book checksum published by the exchange, when present.
    pub checksum: Option<u32>,
}

/// Subscribe/unsubscribe acknowledgement (or an outbound frame parsed back,
/// which round-trips to the same representation).
#[derive(Debug, Clone)]
pub struct SubscriptionAck {
    pub channel: Channel,
    pub symbols: Vec<String>,
    pub depth: Option<u32>,
    pub success: bool,
}

/// Exchange status frame.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub system: String,
    pub version: String,
}

/// A tagged inbound frame.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Ticker(Vec<Ticker>),
    Trade(Vec<Trade>),
    BookSnapshot(Vec<BookPayload>),
    BookUpdate(Vec<BookPayload>),
    Ohlc(Vec<Ohlc>),
    Order(Vec<Order>),
    OwnTrade(Vec<OwnTrade>),
    BalanceSnapshot(Vec<Balance>),
    Subscribed(SubscriptionAck),
    Unsubscribed(SubscriptionAck),
    Heartbeat,
    Status(StatusInfo),
    Error(String),
    Unknown,
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

/// Numbers arrive both as JSON numbers and as decimal strings.
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn field_f64(obj: &Map<String, Value>, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(value_f64))
        .unwrap_or(0.0)
}

fn field_str(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn field_u64(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64))
}

fn parse_err(message: impl Into<String>) -> KrakenError {
    KrakenError::Parse(message.into())
}

fn data_array<'a>(obj: &'a Map<String, Value>) -> Result<&'a Vec<Value>, KrakenError> {
    obj.get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_err("frame has no data array"))
}

fn element_objects<'a>(
    data: &'a [Value],
) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    data.iter().filter_map(Value::as_object)
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse one inbound frame. Unrecognized channels and methods parse to
/// [`ParsedMessage::Unknown`]; malformed frames fail with `ParseError`.
pub fn parse_message(raw: &str) -> Result<ParsedMessage, KrakenError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| parse_err(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| parse_err("frame is not a JSON object"))?;

    if let Some(error) = obj.get("error") {
        let text = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Ok(ParsedMessage::Error(text));
    }

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        return parse_method_frame(method, obj);
    }

    let channel = obj
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err("frame has no channel"))?;

    match channel {
        "heartbeat" => Ok(ParsedMessage::Heartbeat),
        "status" => parse_status(obj),
        "ticker" => Ok(ParsedMessage::Ticker(parse_tickers(data_array(obj)?))),
        "trade" => parse_trades(data_array(obj)?).map(ParsedMessage::Trade),
        "book" => parse_book(obj),
        "ohlc" => Ok(ParsedMessage::Ohlc(parse_ohlc(data_array(obj)?))),
        "executions" => parse_executions(data_array(obj)?),
        "balances" => Ok(ParsedMessage::BalanceSnapshot(parse_balances(data_array(
            obj,
        )?))),
        _ => Ok(ParsedMessage::Unknown),
    }
}

fn parse_method_frame(
    method: &str,
    obj: &Map<String, Value>,
) -> Result<ParsedMessage, KrakenError> {
    if method != "subscribe" && method != "unsubscribe" {
        return Ok(ParsedMessage::Unknown);
    }

    // The ack carries `result`; an outbound frame carries `params`. Both
    // round-trip to the same representation.
    let body = obj
        .get("result")
        .or_else(|| obj.get("params"))
        .and_then(Value::as_object)
        .ok_or_else(|| parse_err("subscribe frame has no params or result"))?;

    let channel_name = body
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err("subscribe frame has no channel"))?;
    let channel = Channel::from_wire(channel_name)
        .ok_or_else(|| parse_err(format!("unknown channel: {channel_name}")))?;

    let symbols = body
        .get("symbol")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let depth = body.get("depth").and_then(Value::as_u64).map(|d| d as u32);
    let success = obj.get("success").and_then(Value::as_bool).unwrap_or(true);

    let ack = SubscriptionAck {
        channel,
        symbols,
        depth,
        success,
    };
    if method == "subscribe" {
        Ok(ParsedMessage::Subscribed(ack))
    } else {
        Ok(ParsedMessage::Unsubscribed(ack))
    }
}

fn parse_status(obj: &Map<String, Value>) -> Result<ParsedMessage, KrakenError> {
    let first = data_array(obj)?.first().and_then(Value::as_object);
    let (system, version) = match first {
        Some(entry) => (
            field_str(entry, &["system"]),
            field_str(entry, &["api_version", "version"]),
        ),
        None => (String::new(), String::new()),
    };
    Ok(ParsedMessage::Status(StatusInfo { system, version }))
}

fn parse_tickers(data: &[Value]) -> Vec<Ticker> {
    element_objects(data)
        .map(|entry| Ticker {
            symbol: field_str(entry, &["symbol"]),
            last: field_f64(entry, &["last"]),
            bid: field_f64(entry, &["bid"]),
            ask: field_f64(entry, &["ask"]),
            volume_24h: field_f64(entry, &["volume", "volume_24h"]),
            high: field_f64(entry, &["high"]),
            low: field_f64(entry, &["low"]),
            timestamp: field_str(entry, &["timestamp"]),
        })
        .collect()
}

fn parse_trades(data: &[Value]) -> Result<Vec<Trade>, KrakenError> {
    element_objects(data)
        .map(|entry| {
            let side_text = field_str(entry, &["side"]);
            let side = Side::from_wire(&side_text)
                .ok_or_else(|| parse_err(format!("unknown trade side: {side_text:?}")))?;
            Ok(Trade {
                symbol: field_str(entry, &["symbol"]),
                price: field_f64(entry, &["price"]),
                quantity: field_f64(entry, &["qty", "quantity"]),
                side,
                timestamp: field_str(entry, &["timestamp"]),
            })
        })
        .collect()
}

/// Book levels arrive either as `["price", "qty"]` pairs or as
/// `{"price": ..., "qty": ...}` objects.
fn parse_levels(value: Option<&Value>) -> Vec<BookLevel> {
    let Some(arr) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|level| match level {
            Value::Array(pair) if pair.len() >= 2 => Some(BookLevel {
                price: value_f64(&pair[0])?,
                qty: value_f64(&pair[1])?,
            }),
            Value::Object(entry) => Some(BookLevel {
                price: entry.get("price").and_then(value_f64)?,
                qty: entry.get("qty").and_then(value_f64)?,
            }),
            _ => None,
        })
        .collect()
}

fn parse_book(obj: &Map<String, Value>) -> Result<ParsedMessage, KrakenError> {
    let payloads: Vec<BookPayload> = element_objects(data_array(obj)?)
        .map(|entry| BookPayload {
            symbol: field_str(entry, &["symbol"]),
            bids: parse_levels(entry.get("bids")),
            asks: parse_levels(entry.get("asks")),
            checksum: field_u64(entry, &["checksum"]).map(|c| c as u32),
        })
        .collect();

    let kind = obj.get("type").and_then(Value::as_str).unwrap_or("update");
    if kind == "snapshot" {
        Ok(ParsedMessage::BookSnapshot(payloads))
    } else {
        Ok(ParsedMessage::BookUpdate(payloads))
    }
}

fn parse_ohlc(data: &[Value]) -> Vec<Ohlc> {
    element_objects(data)
        .map(|entry| Ohlc {
            symbol: field_str(entry, &["symbol"]),
            open: field_f64(entry, &["open"]),
            high: field_f64(entry, &["high"]),
            low: field_f64(entry, &["low"]),
            close: field_f64(entry, &["close"]),
            volume: field_f64(entry, &["volume"]),
            interval: field_u64(entry, &["interval"]).unwrap_or(0) as u32,
            timestamp: field_str(entry, &["timestamp", "interval_begin"]),
        })
        .collect()
}

/// Executions frames carry order-state updates and own-trade fills on the
/// same channel, distinguished by `exec_type`. Frames are homogeneous in
/// practice; the first element decides the mapping.
fn parse_executions(data: &[Value]) -> Result<ParsedMessage, KrakenError> {
    let is_trade = data
        .first()
        .and_then(Value::as_object)
        .map(|entry| field_str(entry, &["exec_type"]) == "trade")
        .unwrap_or(false);

    if is_trade {
        let trades = element_objects(data)
            .map(|entry| OwnTrade {
                trade_id: field_str(entry, &["trade_id", "exec_id"]),
                order_id: field_str(entry, &["order_id"]),
                symbol: field_str(entry, &["symbol"]),
                side: Side::from_wire(&field_str(entry, &["side"])),
                price: field_f64(entry, &["last_price", "price"]),
                quantity: field_f64(entry, &["last_qty", "qty", "quantity"]),
                fee: field_f64(entry, &["fee", "fee_usd_equiv"]),
                fee_currency: field_str(entry, &["fee_currency"]),
                timestamp: field_str(entry, &["timestamp"]),
                seq: field_u64(entry, &["seq"]),
            })
            .collect();
        Ok(ParsedMessage::OwnTrade(trades))
    } else {
        let orders = element_objects(data)
            .map(|entry| {
                let quantity = field_f64(entry, &["order_qty", "qty", "quantity"]);
                let filled = field_f64(entry, &["cum_qty", "filled"]);
                Order {
                    order_id: field_str(entry, &["order_id"]),
                    symbol: field_str(entry, &["symbol"]),
                    side: Side::from_wire(&field_str(entry, &["side"])),
                    order_type: field_str(entry, &["order_type", "ord_type"]),
                    status: field_str(entry, &["order_status", "status"]),
                    price: field_f64(entry, &["limit_price", "price"]),
                    quantity,
                    filled,
                    remaining: entry
                        .get("leaves_qty")
                        .and_then(value_f64)
                        .unwrap_or(quantity - filled),
                    timestamp: field_str(entry, &["timestamp"]),
                    seq: field_u64(entry, &["seq"]),
                }
            })
            .collect();
        Ok(ParsedMessage::Order(orders))
    }
}

fn parse_balances(data: &[Value]) -> Vec<Balance> {
    element_objects(data)
        .map(|entry| {
            let available = field_f64(entry, &["balance", "available"]);
            let reserved = field_f64(entry, &["hold_trade", "reserved"]);
            Balance {
                asset: field_str(entry, &["asset", "currency"]),
                available,
                reserved,
                total: available + reserved,
                seq: field_u64(entry, &["seq"]),
            }
        })
        .collect()
}

// =============================================================================
// FRAME BUILDING
// =============================================================================

/// Build a subscribe frame. Public channels list symbols; private channels
/// authenticate with a token instead. `depth` applies to book only.
pub fn build_subscribe(
    channel: Channel,
    symbols: &[String],
    depth: Option<u32>,
    token: Option<&str>,
) -> String {
    let mut params = Map::new();
    params.insert("channel".into(), json!(channel.wire_name()));
    if channel.is_private() {
        params.insert("token".into(), json!(token.unwrap_or_default()));
    } else {
        params.insert("symbol".into(), json!(symbols));
    }
    if channel == Channel::Book {
        if let Some(depth) = depth {
            params.insert("depth".into(), json!(depth));
        }
    }
    json!({ "method": "subscribe", "params": params }).to_string()
}

/// Build an unsubscribe frame, symmetric with [`build_subscribe`].
pub fn build_unsubscribe(channel: Channel, symbols: &[String], token: Option<&str>) -> String {
    let mut params = Map::new();
    params.insert("channel".into(), json!(channel.wire_name()));
    if channel.is_private() {
        params.insert("token".into(), json!(token.unwrap_or_default()));
    } else {
        params.insert("symbol".into(), json!(symbols));
    }
    json!({ "method": "unsubscribe", "params": params }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker() {
        let raw = r#"{
            "channel": "ticker",
            "type": "update",
            "data": [{
                "symbol": "BTC/USD",
                "bid": "50000.5",
                "ask": "50001.0",
                "last": "50000.75",
                "volume": "1234.56",
                "high": "51000.0",
                "low": "49000.0",
                "timestamp": "2024-01-01T00:00:00Z"
            }]
        }"#;

        let ParsedMessage::Ticker(tickers) = parse_message(raw).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(tickers.len(), 1);
        let t = &tickers[0];
        assert_eq!(t.symbol, "BTC/USD");
        assert_eq!(t.bid, 50_000.5);
        assert_eq!(t.ask, 50_001.0);
        assert_eq!(t.last, 50_000.75);
        assert_eq!(t.volume_24h, 1234.56);
        assert_eq!(t.timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_parse_ticker_numeric_fields() {
        // Fields may arrive as JSON numbers rather than strings.
        let raw = r#"{
            "channel": "ticker",
            "data": [{"symbol": "ETH/USD", "last": 3000.5, "bid": 3000, "ask": 3001}]
        }"#;
        let ParsedMessage::Ticker(tickers) = parse_message(raw).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(tickers[0].last, 3000.5);
        assert_eq!(tickers[0].bid, 3000.0);
    }

    #[test]
    fn test_parse_trade() {
        let raw = r#"{
            "channel": "trade",
            "data": [{
                "symbol": "BTC/USD",
                "price": "50000.5",
                "qty": "0.1",
                "side": "buy",
                "timestamp": "2024-01-01T00:00:00Z"
            }]
        }"#;
        let ParsedMessage::Trade(trades) = parse_message(raw).unwrap() else {
            panic!("expected trade");
        };
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].price, 50_000.5);
        assert_eq!(trades[0].quantity, 0.1);
    }

    #[test]
    fn test_parse_trade_bad_side() {
        let raw = r#"{
            "channel": "trade",
            "data": [{"symbol": "BTC/USD", "price": "1", "qty": "1", "side": "short"}]
        }"#;
        assert!(matches!(
            parse_message(raw),
            Err(KrakenError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_book_snapshot() {
        let raw = r#"{
            "channel": "book",
            "type": "snapshot",
            "data": [{
                "symbol": "BTC/USD",
                "bids": [["50000.0", "1.5"], ["49999.0", "2.0"]],
                "asks": [["50001.0", "1.2"], ["50002.0", "3.0"]],
                "checksum": 1234567890
            }]
        }"#;
        let ParsedMessage::BookSnapshot(payloads) = parse_message(raw).unwrap() else {
            panic!("expected book snapshot");
        };
        let p = &payloads[0];
        assert_eq!(p.symbol, "BTC/USD");
        assert_eq!(p.bids.len(), 2);
        assert_eq!(p.asks[1].price, 50_002.0);
        assert_eq!(p.checksum, Some(1_234_567_890));
    }

    #[test]
    fn test_parse_book_update_object_levels() {
        let raw = r#"{
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "BTC/USD",
                "bids": [{"price": "50000.0", "qty": "0"}],
                "asks": [{"price": 50001.5, "qty": 2.25}]
            }]
        }"#;
        let ParsedMessage::BookUpdate(payloads) = parse_message(raw).unwrap() else {
            panic!("expected book update");
        };
        assert_eq!(payloads[0].bids[0].qty, 0.0);
        assert_eq!(payloads[0].asks[0].price, 50_001.5);
        assert_eq!(payloads[0].checksum, None);
    }

    #[test]
    fn test_parse_executions_orders() {
        let raw = r#"{
            "channel": "executions",
            "type": "update",
            "data": [{
                "order_id": "o-123",
                "symbol": "BTC/USD",
                "side": "buy",
                "order_type": "limit",
                "order_status": "open",
                "limit_price": "50000.0",
                "order_qty": "1.0",
                "cum_qty": "0.25",
                "timestamp": "2024-01-01T00:00:00Z",
                "seq": 7
            }]
        }"#;
        let ParsedMessage::Order(orders) = parse_message(raw).unwrap() else {
            panic!("expected orders");
        };
        let o = &orders[0];
        assert_eq!(o.order_id, "o-123");
        assert_eq!(o.side, Some(Side::Buy));
        assert_eq!(o.filled, 0.25);
        assert_eq!(o.remaining, 0.75);
        assert_eq!(o.seq, Some(7));
    }

    #[test]
    fn test_parse_executions_own_trades() {
        let raw = r#"{
            "channel": "executions",
            "type": "update",
            "data": [{
                "exec_type": "trade",
                "trade_id": "t-9",
                "order_id": "o-123",
                "symbol": "BTC/USD",
                "side": "sell",
                "last_price": "50000.0",
                "last_qty": "0.5",
                "fee": "12.5",
                "fee_currency": "USD",
                "seq": 8
            }]
        }"#;
        let ParsedMessage::OwnTrade(trades) = parse_message(raw).unwrap() else {
            panic!("expected own trades");
        };
        let t = &trades[0];
        assert_eq!(t.trade_id, "t-9");
        assert_eq!(t.side, Some(Side::Sell));
        assert_eq!(t.fee, 12.5);
        assert_eq!(t.seq, Some(8));
    }

    #[test]
    fn test_parse_balances() {
        let raw = r#"{
            "channel": "balances",
            "type": "snapshot",
            "data": [
                {"asset": "BTC", "balance": "1.5", "hold_trade": "0.5"},
                {"asset": "USD", "balance": "10000"}
            ]
        }"#;
        let ParsedMessage::BalanceSnapshot(balances) = parse_message(raw).unwrap() else {
            panic!("expected balances");
        };
        assert_eq!(balances[0].asset, "BTC");
        assert_eq!(balances[0].total, 2.0);
        assert_eq!(balances[1].reserved, 0.0);
    }

    #[test]
    fn test_parse_heartbeat_and_status() {
        assert!(matches!(
            parse_message(r#"{"channel": "heartbeat"}"#).unwrap(),
            ParsedMessage::Heartbeat
        ));

        let raw = r#"{
            "channel": "status",
            "data": [{"system": "online", "api_version": "v2"}]
        }"#;
        let ParsedMessage::Status(status) = parse_message(raw).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(status.system, "online");
        assert_eq!(status.version, "v2");
    }

    #[test]
    fn test_parse_error_frame() {
        let ParsedMessage::Error(text) =
            parse_message(r#"{"error": "Currency pair not supported"}"#).unwrap()
        else {
            panic!("expected error");
        };
        assert_eq!(text, "Currency pair not supported");
    }

    #[test]
    fn test_parse_unknown_channel() {
        assert!(matches!(
            parse_message(r#"{"channel": "level3", "data": []}"#).unwrap(),
            ParsedMessage::Unknown
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_message("not json").is_err());
        assert!(parse_message("[1, 2, 3]").is_err());
        assert!(parse_message(r#"{"nochannel": true}"#).is_err());
        assert!(parse_message(r#"{"channel": "ticker"}"#).is_err());
    }

    #[test]
    fn test_subscribe_round_trip() {
        let symbols = vec!["BTC/USD".to_string(), "ETH/USD".to_string()];
        let frame = build_subscribe(Channel::Ticker, &symbols, None, None);

        let ParsedMessage::Subscribed(ack) = parse_message(&frame).unwrap() else {
            panic!("expected subscribed");
        };
        assert_eq!(ack.channel, Channel::Ticker);
        assert_eq!(ack.symbols, symbols);
        assert_eq!(ack.depth, None);
        assert!(ack.success);
    }

    #[test]
    fn test_subscribe_book_round_trip() {
        let symbols = vec!["BTC/USD".to_string()];
        let frame = build_subscribe(Channel::Book, &symbols, Some(25), None);

        let ParsedMessage::Subscribed(ack) = parse_message(&frame).unwrap() else {
            panic!("expected subscribed");
        };
        assert_eq!(ack.channel, Channel::Book);
        assert_eq!(ack.symbols, symbols);
        assert_eq!(ack.depth, Some(25));
    }

    #[test]
    fn test_unsubscribe_round_trip() {
        let symbols = vec!["BTC/USD".to_string()];
        let frame = build_unsubscribe(Channel::Trade, &symbols, None);

        let ParsedMessage::Unsubscribed(ack) = parse_message(&frame).unwrap() else {
            panic!("expected unsubscribed");
        };
        assert_eq!(ack.channel, Channel::Trade);
        assert_eq!(ack.symbols, symbols);
    }

    #[test]
    fn test_private_subscribe_carries_token() {
        let frame = build_subscribe(Channel::OwnTrade, &[], None, Some("secret-token"));
        assert!(frame.contains(r#""channel":"executions""#));
        assert!(frame.contains(r#""token":"secret-token""#));
        assert!(!frame.contains("symbol"));
    }

    #[test]
    fn test_subscribe_ack_frame() {
        // The exchange's ack shape: result + success.
        let raw = r#"{
            "method": "subscribe",
            "result": {"channel": "book", "symbol": ["BTC/USD"], "depth": 10},
            "success": true
        }"#;
        let ParsedMessage::Subscribed(ack) = parse_message(raw).unwrap() else {
            panic!("expected subscribed");
        };
        assert_eq!(ack.channel, Channel::Book);
        assert_eq!(ack.depth, Some(10));
        assert!(ack.success);
    }

    #[test]
    fn test_depth_only_on_book() {
        let frame = build_subscribe(
            Channel::Ticker,
            &["BTC/USD".to_string()],
            Some(10),
            None,
        );
        assert!(!frame.contains("depth"));
    }
}
