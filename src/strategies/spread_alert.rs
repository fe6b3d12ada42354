//! Bid/ask spread alert.

use super::AlertStrategy;
use crate::types::Ticker;

/// Fires when the spread widens past `max_spread` (thin liquidity) or
/// narrows below `min_spread` (often a crossed or suspicious book).
/// Evaluates every tick; there is no latch.
pub struct SpreadAlert {
    symbol: String,
    max_spread: Option<f64>,
    min_spread: Option<f64>,
    fire_count: u64,
    last_message: String,
}

impl SpreadAlert {
    pub fn builder() -> SpreadAlertBuilder {
        SpreadAlertBuilder::default()
    }
}

impl AlertStrategy for SpreadAlert {
    fn check(&mut self, ticker: &Ticker) -> bool {
        if ticker.symbol != self.symbol {
            return false;
        }

        let spread = ticker.spread();
        let too_wide = self.max_spread.is_some_and(|max| spread > max);
        let too_narrow = self.min_spread.is_some_and(|min| spread < min);
        if !too_wide && !too_narrow {
            return false;
        }

        self.fire_count += 1;
        self.last_message = if too_wide {
            format!(
                "Spread too wide on {}: ${:.2} (max ${:.2})",
                ticker.symbol,
                spread,
                self.max_spread.unwrap_or(0.0)
            )
        } else {
            format!(
                "Spread too narrow on {}: ${:.2} (min ${:.2})",
                ticker.symbol,
                spread,
                self.min_spread.unwrap_or(0.0)
            )
        };
        true
    }

    fn name(&self) -> &str {
        "SpreadAlert"
    }

    fn symbols(&self) -> Vec<String> {
        vec![self.symbol.clone()]
    }

    fn reset(&mut self) {
        self.fire_count = 0;
    }

    fn fire_count(&self) -> u64 {
        self.fire_count
    }

    fn last_message(&self) -> String {
        self.last_message.clone()
    }
}

#[derive(Default)]
pub struct SpreadAlertBuilder {
    symbol: String,
    max_spread: Option<f64>,
    min_spread: Option<f64>,
}

impl SpreadAlertBuilder {
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn max_spread(mut self, spread: f64) -> Self {
        self.max_spread = Some(spread);
        self
    }

    pub fn min_spread(mut self, spread: f64) -> Self {
        self.min_spread = Some(spread);
        self
    }

    pub fn build(self) -> SpreadAlert {
        SpreadAlert {
            symbol: self.symbol,
            max_spread: self.max_spread,
            min_spread: self.min_spread,
            fire_count: 0,
            last_message: String::new(),
        }
    }
}
