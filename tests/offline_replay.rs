//! Offline-mode scenarios: injected messages flow through the same
//! dispatch path the wire would use, so callbacks, strategies, books and
//! backpressure can be exercised without a connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kraken_stream::{
    BookEngine, BookLevel, BookPayload, ClientConfig, ErrorKind, KrakenClient, OrderBook,
    PriceAlert, Side, Ticker, Trade, VolumeSpike,
};

/// Offline client dispatching inline on the injecting thread, so every
/// assertion is synchronous.
fn offline_client() -> KrakenClient {
    let config = ClientConfig::builder()
        .offline_mode(true)
        .use_queue(false)
        .build()
        .unwrap();
    let client = KrakenClient::with_config(config);
    client.run(); // returns immediately in offline mode
    client
}

fn ticker(symbol: &str, last: f64) -> Ticker {
    Ticker {
        symbol: symbol.into(),
        last,
        bid: last - 0.5,
        ask: last + 0.5,
        ..Default::default()
    }
}

fn ticker_with_volume(symbol: &str, volume: f64) -> Ticker {
    Ticker {
        symbol: symbol.into(),
        last: 50_000.0,
        volume_24h: volume,
        ..Default::default()
    }
}

#[test]
fn injected_ticker_triggers_callback_and_snapshot() {
    let client = offline_client();
    let count = Arc::new(AtomicU64::new(0));
    let last = Arc::new(Mutex::new(0.0_f64));

    let cb_count = count.clone();
    let cb_last = last.clone();
    client.on_ticker(move |t| {
        cb_count.fetch_add(1, Ordering::SeqCst);
        *cb_last.lock().unwrap() = t.last;
    });

    client.replay().inject_ticker(ticker("BTC/USD", 50_000.0));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*last.lock().unwrap(), 50_000.0);
    assert_eq!(client.latest_ticker("BTC/USD").unwrap().last, 50_000.0);
    assert_eq!(client.all_tickers().len(), 1);

    client.stop();
}

#[test]
fn injected_trade_triggers_callback() {
    let client = offline_client();
    let prices = Arc::new(Mutex::new(Vec::new()));

    let cb_prices = prices.clone();
    client.on_trade(move |t| cb_prices.lock().unwrap().push(t.price));

    client.replay().inject_trade(Trade {
        symbol: "ETH/USD".into(),
        price: 3_000.0,
        quantity: 0.5,
        side: Side::Sell,
        timestamp: String::new(),
    });

    assert_eq!(*prices.lock().unwrap(), vec![3_000.0]);
    client.stop();
}

// S1: exactly one alert, at the first qualifying tick.
#[test]
fn price_alert_fires_once() {
    let client = offline_client();
    let alerts = Arc::new(Mutex::new(Vec::new()));

    let cb_alerts = alerts.clone();
    client.add_alert(
        PriceAlert::builder().symbol("BTC/USD").above(50_000.0).build(),
        move |alert| cb_alerts.lock().unwrap().push(alert.clone()),
    );

    let replay = client.replay();
    replay.inject_ticker(ticker("BTC/USD", 49_000.0));
    replay.inject_ticker(ticker("BTC/USD", 51_000.0));
    replay.inject_ticker(ticker("BTC/USD", 52_000.0));

    let alerts = alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].price, 51_000.0);
    assert_eq!(alerts[0].strategy_name, "PriceAlert");
    assert_eq!(alerts[0].symbol, "BTC/USD");

    assert_eq!(client.get_metrics().alerts_triggered, 1);
    assert_eq!(client.alert_trigger_count("PriceAlert"), 1);
    assert_eq!(client.alert_trigger_count("VolumeSpike"), 0);
    client.stop();
}

// S2: recurring with cooldown fires at t=0 and after the cooldown, not in
// between.
#[test]
fn recurring_alert_respects_cooldown() {
    let client = offline_client();
    let fired = Arc::new(AtomicU64::new(0));

    let cb_fired = fired.clone();
    client.add_alert(
        PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .recurring(true)
            .cooldown(Duration::from_millis(100))
            .build(),
        move |_| {
            cb_fired.fetch_add(1, Ordering::SeqCst);
        },
    );

    let replay = client.replay();
    replay.inject_ticker(ticker("BTC/USD", 51_000.0)); // fires
    std::thread::sleep(Duration::from_millis(50));
    replay.inject_ticker(ticker("BTC/USD", 52_000.0)); // cooldown
    std::thread::sleep(Duration::from_millis(100));
    replay.inject_ticker(ticker("BTC/USD", 53_000.0)); // fires

    assert_eq!(fired.load(Ordering::SeqCst), 2);
    client.stop();
}

// S3: ten baseline samples, then a 3x volume tick fires exactly once.
#[test]
fn volume_spike_fires_once() {
    let client = offline_client();
    let fired = Arc::new(AtomicU64::new(0));

    let cb_fired = fired.clone();
    client.add_alert(
        VolumeSpike::builder()
            .symbols(["BTC/USD"])
            .multiplier(2.0)
            .lookback(10)
            .build(),
        move |_| {
            cb_fired.fetch_add(1, Ordering::SeqCst);
        },
    );

    let replay = client.replay();
    for _ in 0..10 {
        replay.inject_ticker(ticker_with_volume("BTC/USD", 100.0));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    replay.inject_ticker(ticker_with_volume("BTC/USD", 300.0));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    client.stop();
}

#[test]
fn book_snapshot_and_update_flow() {
    let client = offline_client();
    let books_seen = Arc::new(AtomicU64::new(0));

    let cb_seen = books_seen.clone();
    client.on_book(move |symbol, book| {
        assert_eq!(symbol, "BTC/USD");
        assert_eq!(symbol, book.symbol);
        cb_seen.fetch_add(1, Ordering::SeqCst);
    });

    let replay = client.replay();
    replay.inject_book_snapshot(BookPayload {
        symbol: "BTC/USD".into(),
        bids: vec![
            BookLevel { price: 50_000.0, qty: 1.0 },
            BookLevel { price: 49_999.0, qty: 2.0 },
        ],
        asks: vec![
            BookLevel { price: 50_001.0, qty: 1.0 },
            BookLevel { price: 50_002.0, qty: 2.0 },
        ],
        checksum: None,
    });
    replay.inject_book_update(BookPayload {
        symbol: "BTC/USD".into(),
        bids: vec![BookLevel { price: 50_000.5, qty: 0.5 }],
        asks: vec![BookLevel { price: 50_001.0, qty: 0.0 }],
        checksum: None,
    });

    assert_eq!(books_seen.load(Ordering::SeqCst), 2);
    let book = client.latest_book("BTC/USD").unwrap();
    assert_eq!(book.best_bid().unwrap().price, 50_000.5);
    assert_eq!(book.best_ask().unwrap().price, 50_002.0);
    client.stop();
}

#[test]
fn checksum_mismatch_surfaces_error() {
    let client = offline_client();
    let kinds = Arc::new(Mutex::new(Vec::new()));

    let cb_kinds = kinds.clone();
    client.on_error(move |event| cb_kinds.lock().unwrap().push(event.kind));

    client.replay().inject_book_snapshot(BookPayload {
        symbol: "BTC/USD".into(),
        bids: vec![BookLevel { price: 50_000.0, qty: 1.0 }],
        asks: vec![BookLevel { price: 50_001.0, qty: 1.0 }],
        checksum: Some(12_345), // definitely wrong
    });

    let kinds = kinds.lock().unwrap();
    assert!(kinds.contains(&ErrorKind::ChecksumMismatch));
    assert_eq!(client.get_metrics().checksum_failures, 1);
    client.stop();
}

#[test]
fn matching_checksum_passes_silently() {
    // Compute the expected checksum the same way the engine will.
    let reference = OrderBook {
        symbol: "BTC/USD".into(),
        bids: vec![BookLevel { price: 50_000.0, qty: 1.0 }],
        asks: vec![BookLevel { price: 50_001.0, qty: 1.0 }],
        checksum: 0,
    };
    let expected = BookEngine::compute_checksum(&reference);

    let client = offline_client();
    let errors = Arc::new(AtomicU64::new(0));
    let cb_errors = errors.clone();
    client.on_error(move |_| {
        cb_errors.fetch_add(1, Ordering::SeqCst);
    });

    client.replay().inject_book_snapshot(BookPayload {
        symbol: "BTC/USD".into(),
        bids: vec![BookLevel { price: 50_000.0, qty: 1.0 }],
        asks: vec![BookLevel { price: 50_001.0, qty: 1.0 }],
        checksum: Some(expected),
    });

    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert_eq!(client.get_metrics().checksum_failures, 0);
    client.stop();
}

#[test]
fn queue_overflow_drops_and_reports() {
    // Queue on, but the dispatcher is never started: the queue fills
    // deterministically and the overflow policy kicks in.
    let config = ClientConfig::builder()
        .offline_mode(true)
        .use_queue(true)
        .queue_capacity(4)
        .build()
        .unwrap();
    let client = KrakenClient::with_config(config);

    let overflows = Arc::new(AtomicU64::new(0));
    let cb_overflows = overflows.clone();
    client.on_error(move |event| {
        if event.kind == ErrorKind::QueueOverflow {
            cb_overflows.fetch_add(1, Ordering::SeqCst);
        }
    });

    let replay = client.replay();
    for i in 0..6 {
        replay.inject_ticker(ticker("BTC/USD", 50_000.0 + i as f64));
    }

    assert_eq!(overflows.load(Ordering::SeqCst), 2);
    let metrics = client.get_metrics();
    assert_eq!(metrics.messages_dropped, 2);
    assert_eq!(metrics.queue_depth, 4);
}

#[test]
fn panicking_callback_reports_and_continues() {
    let client = offline_client();
    let callback_errors = Arc::new(AtomicU64::new(0));
    let delivered = Arc::new(AtomicU64::new(0));

    let cb_errors = callback_errors.clone();
    client.on_error(move |event| {
        if event.kind == ErrorKind::CallbackError {
            cb_errors.fetch_add(1, Ordering::SeqCst);
        }
    });
    client.on_ticker(|_| panic!("user callback exploded"));

    let cb_delivered = delivered.clone();
    client.on_trade(move |_| {
        cb_delivered.fetch_add(1, Ordering::SeqCst);
    });

    let replay = client.replay();
    replay.inject_ticker(ticker("BTC/USD", 50_000.0));
    // The pipeline survives and keeps delivering other messages.
    replay.inject_trade(Trade {
        symbol: "BTC/USD".into(),
        price: 1.0,
        quantity: 1.0,
        side: Side::Buy,
        timestamp: String::new(),
    });

    assert_eq!(callback_errors.load(Ordering::SeqCst), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    client.stop();
}

#[test]
fn panicking_error_callback_is_swallowed() {
    let client = offline_client();
    client.on_error(|_| panic!("error callback exploded"));
    client.on_ticker(|_| panic!("ticker callback exploded"));

    // Must not crash or recurse.
    client.replay().inject_ticker(ticker("BTC/USD", 50_000.0));
    client.stop();
}

#[test]
fn raw_frame_injection_goes_through_parser() {
    let client = offline_client();
    let tickers = Arc::new(AtomicU64::new(0));
    let parse_errors = Arc::new(AtomicU64::new(0));

    let cb_tickers = tickers.clone();
    client.on_ticker(move |_| {
        cb_tickers.fetch_add(1, Ordering::SeqCst);
    });
    let cb_parse = parse_errors.clone();
    client.on_error(move |event| {
        if event.kind == ErrorKind::ParseError {
            cb_parse.fetch_add(1, Ordering::SeqCst);
        }
    });

    let replay = client.replay();
    replay.inject_frame(
        r#"{"channel":"ticker","data":[{"symbol":"BTC/USD","last":"50000.5"}]}"#,
    );
    replay.inject_frame("not json at all");

    assert_eq!(tickers.load(Ordering::SeqCst), 1);
    assert_eq!(parse_errors.load(Ordering::SeqCst), 1);
    assert_eq!(client.get_metrics().parse_errors, 1);
    client.stop();
}

#[test]
fn queued_offline_dispatch_delivers_asynchronously() {
    // Offline but with the queue and dispatcher running: injection is
    // asynchronous and order is preserved.
    let config = ClientConfig::builder()
        .offline_mode(true)
        .use_queue(true)
        .build()
        .unwrap();
    let client = KrakenClient::with_config(config);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let cb_seen = seen.clone();
    client.on_ticker(move |t| cb_seen.lock().unwrap().push(t.last));

    client.run(); // offline: returns after starting the dispatcher
    let replay = client.replay();
    for i in 0..100 {
        replay.inject_ticker(ticker("BTC/USD", i as f64));
    }

    // Wait for the dispatcher to drain.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if seen.lock().unwrap().len() == 100 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let observed = seen.lock().unwrap().clone();
    let expected: Vec<f64> = (0..100).map(|i| i as f64).collect();
    assert_eq!(observed, expected);
    client.stop();
}
