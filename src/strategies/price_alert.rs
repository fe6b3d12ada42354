//! Price threshold alert.

use std::time::{Duration, Instant};

use super::AlertStrategy;
use crate::types::Ticker;

/// Fires when the last price crosses an upper or lower threshold.
///
/// One-shot by default: after the first firing it latches until
/// [`reset`](AlertStrategy::reset). With `recurring` it fires on every
/// qualifying tick, throttled by `cooldown`.
pub struct PriceAlert {
    symbol: String,
    above: Option<f64>,
    below: Option<f64>,
    recurring: bool,
    cooldown: Duration,
    fired: bool,
    fire_count: u64,
    last_fired: Option<Instant>,
    previous_price: Option<f64>,
    last_message: String,
}

impl PriceAlert {
    pub fn builder() -> PriceAlertBuilder {
        PriceAlertBuilder::default()
    }
}

impl AlertStrategy for PriceAlert {
    fn check(&mut self, ticker: &Ticker) -> bool {
        if ticker.symbol != self.symbol {
            return false;
        }

        let above_hit = self.above.is_some_and(|threshold| ticker.last >= threshold);
        let below_hit = self.below.is_some_and(|threshold| ticker.last <= threshold);
        let previous = self.previous_price;
        self.previous_price = Some(ticker.last);

        if !above_hit && !below_hit {
            return false;
        }
        if !self.recurring && self.fired {
            return false;
        }
        if self.recurring && !self.cooldown.is_zero() {
            if let Some(last) = self.last_fired {
                if last.elapsed() < self.cooldown {
                    return false;
                }
            }
        }

        let (direction, threshold) = if above_hit {
            ("above", self.above.unwrap_or(0.0))
        } else {
            ("below", self.below.unwrap_or(0.0))
        };
        self.last_message = match previous {
            Some(prev) => format!(
                "Price {direction} ${threshold:.2}: was ${prev:.2}, now ${:.2} (change: {:+.2})",
                ticker.last,
                ticker.last - prev
            ),
            None => format!("Price {direction} ${threshold:.2}: ${:.2}", ticker.last),
        };

        self.fired = true;
        self.fire_count += 1;
        self.last_fired = Some(Instant::now());
        true
    }

    fn name(&self) -> &str {
        "PriceAlert"
    }

    fn symbols(&self) -> Vec<String> {
        vec![self.symbol.clone()]
    }

    /// Clears the latch and cooldown. The observed price history is market
    /// state, not alert state, and is kept.
    fn reset(&mut self) {
        self.fired = false;
        self.last_fired = None;
    }

    fn has_fired(&self) -> bool {
        self.fired
    }

    fn fire_count(&self) -> u64 {
        self.fire_count
    }

    fn last_message(&self) -> String {
        self.last_message.clone()
    }
}

#[derive(Default)]
pub struct PriceAlertBuilder {
    symbol: String,
    above: Option<f64>,
    below: Option<f64>,
    recurring: bool,
    cooldown: Duration,
}

impl PriceAlertBuilder {
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn above(mut self, threshold: f64) -> Self {
        self.above = Some(threshold);
        self
    }

    pub fn below(mut self, threshold: f64) -> Self {
        self.below = Some(threshold);
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    /// Minimum gap between recurring firings.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn build(self) -> PriceAlert {
        PriceAlert {
            symbol: self.symbol,
            above: self.above,
            below: self.below,
            recurring: self.recurring,
            cooldown: self.cooldown,
            fired: false,
            fire_count: 0,
            last_fired: None,
            previous_price: None,
            last_message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: f64) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            last: price,
            bid: price - 0.5,
            ask: price + 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_triggers_when_above_threshold() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .build();

        assert!(!alert.check(&ticker("BTC/USD", 49_000.0)));
        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        // Latched: no repeat without reset.
        assert!(!alert.check(&ticker("BTC/USD", 52_000.0)));
        assert_eq!(alert.fire_count(), 1);
    }

    #[test]
    fn test_triggers_when_below_threshold() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .below(40_000.0)
            .build();

        assert!(!alert.check(&ticker("BTC/USD", 45_000.0)));
        assert!(alert.check(&ticker("BTC/USD", 39_000.0)));
        assert!(alert.last_message().contains("Price below"));
    }

    #[test]
    fn test_reset_allows_retrigger() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .build();

        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        assert!(!alert.check(&ticker("BTC/USD", 52_000.0)));

        alert.reset();
        assert!(!alert.has_fired());
        assert!(alert.check(&ticker("BTC/USD", 53_000.0)));
        assert_eq!(alert.fire_count(), 2);
    }

    #[test]
    fn test_recurring_alerts() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .recurring(true)
            .build();

        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        assert!(alert.has_fired());
        assert_eq!(alert.fire_count(), 1);

        assert!(alert.check(&ticker("BTC/USD", 52_000.0)));
        assert_eq!(alert.fire_count(), 2);

        assert!(alert.check(&ticker("BTC/USD", 53_000.0)));
        assert_eq!(alert.fire_count(), 3);
    }

    #[test]
    fn test_cooldown_prevents_spam() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .recurring(true)
            .cooldown(Duration::from_millis(100))
            .build();

        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        // Inside the cooldown window.
        assert!(!alert.check(&ticker("BTC/USD", 52_000.0)));

        std::thread::sleep(Duration::from_millis(150));
        assert!(alert.check(&ticker("BTC/USD", 53_000.0)));
        assert_eq!(alert.fire_count(), 2);
    }

    #[test]
    fn test_message_includes_price_change() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .build();

        // First firing with no prior observation.
        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        assert!(alert.last_message().contains("Price above"));
        assert!(!alert.last_message().contains("was $"));

        alert.reset();
        alert.check(&ticker("BTC/USD", 49_000.0)); // establishes the prior
        assert!(alert.check(&ticker("BTC/USD", 51_000.0)));
        let message = alert.last_message();
        assert!(message.contains("was $49000.00"));
        assert!(message.contains("change: +2000.00"));
    }

    #[test]
    fn test_ignores_other_symbols() {
        let mut alert = PriceAlert::builder()
            .symbol("BTC/USD")
            .above(50_000.0)
            .build();

        assert_eq!(alert.symbols(), vec!["BTC/USD".to_string()]);
        assert!(!alert.check(&ticker("ETH/USD", 99_999.0)));
        assert!(!alert.has_fired());
    }
}
