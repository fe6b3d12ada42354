//! Alert-strategy example: price thresholds, volume spikes and spread
//! monitoring over the live ticker stream.
//!
//! Run with: `cargo run --example strategies`

use kraken_stream::{Channel, KrakenClient, PriceAlert, SpreadAlert, VolumeSpike};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kraken_stream=info".into()),
        )
        .init();

    let client = KrakenClient::new();

    client.on_error(|event| eprintln!("error: {event}"));

    // One-shot: fires the first time BTC trades above the threshold.
    client.add_alert(
        PriceAlert::builder()
            .symbol("BTC/USD")
            .above(100_000.0)
            .build(),
        |alert| println!("[{}] {}", alert.strategy_name, alert.message),
    );

    // Recurring with a cooldown so a choppy market does not spam.
    client.add_alert(
        PriceAlert::builder()
            .symbol("ETH/USD")
            .below(2_000.0)
            .recurring(true)
            .cooldown(std::time::Duration::from_secs(60))
            .build(),
        |alert| println!("[{}] {}", alert.strategy_name, alert.message),
    );

    // Volume spike across several symbols.
    client.add_alert(
        VolumeSpike::builder()
            .symbols(["BTC/USD", "ETH/USD", "SOL/USD"])
            .multiplier(2.0)
            .lookback(20)
            .build(),
        |alert| println!("[{}] {}", alert.strategy_name, alert.message),
    );

    // Liquidity watch: unusually wide spread.
    client.add_alert(
        SpreadAlert::builder()
            .symbol("BTC/USD")
            .max_spread(50.0)
            .build(),
        |alert| println!("[{}] {}", alert.strategy_name, alert.message),
    );

    println!("{} alerts armed", client.alert_count());

    client
        .subscribe(Channel::Ticker, ["BTC/USD", "ETH/USD", "SOL/USD"])
        .expect("subscribe failed");

    client.run();
}
