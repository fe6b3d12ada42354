//! Minimal live-feed example: subscribe to a couple of tickers and print
//! updates until Ctrl+C.
//!
//! Run with: `cargo run --example quickstart`

use std::sync::Arc;

use kraken_stream::{Channel, KrakenClient};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kraken_stream=info".into()),
        )
        .init();

    let client = Arc::new(KrakenClient::new());

    client.on_connection_state(|state| {
        println!("[connection: {state}]");
    });

    client.on_error(|event| {
        eprintln!("error: {event}");
    });

    client.on_ticker(|ticker| {
        println!(
            "{:<10} last={:<12.2} bid={:<12.2} ask={:<12.2} spread={:.2}",
            ticker.symbol,
            ticker.last,
            ticker.bid,
            ticker.ask,
            ticker.spread()
        );
    });

    client
        .subscribe(Channel::Ticker, ["BTC/USD", "ETH/USD"])
        .expect("subscribe failed");

    {
        let client = client.clone();
        ctrlc_handler(move || client.stop());
    }

    println!("streaming tickers, Ctrl+C to exit");
    client.run();

    let metrics = client.get_metrics();
    println!(
        "done: {} messages in {} ({:.1}/s), {} dropped",
        metrics.messages_processed,
        metrics.uptime_string(),
        metrics.messages_per_second(),
        metrics.messages_dropped
    );
}

/// Small Ctrl+C hook without pulling in a signal crate: spawns a thread
/// that waits for EOF/interrupt on stdin as a stand-in where no signal
/// handling is available.
fn ctrlc_handler(stop: impl Fn() + Send + 'static) {
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        stop();
    });
}
